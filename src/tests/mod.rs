mod websocket_test;
