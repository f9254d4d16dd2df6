use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::utils::error::{Error, Result};

/// The broker address, with optional per connection type overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    overrides: HashMap<String, Url>,
}

impl Endpoint {
    pub fn parse(base: &str, overrides: &HashMap<String, String>) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| Error::Config(format!("endpoint {base}: {e}")))?;
        let overrides = overrides
            .iter()
            .map(|(connection_type, url)| {
                Url::parse(url)
                    .map(|url| (connection_type.clone(), url))
                    .map_err(|e| Error::Config(format!("endpoint for {connection_type}: {e}")))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { base, overrides })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// The URL the given connection type should talk to.
    pub fn url_for(&self, connection_type: &str) -> &Url {
        self.overrides.get(connection_type).unwrap_or(&self.base)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str())
    }
}
