use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::EgressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
    Socks5h,
}

impl ProxyProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Socks5h => "socks5h",
        }
    }

    fn from_scheme(scheme: &str) -> Result<Self, EgressError> {
        match scheme {
            "http" => Ok(ProxyProtocol::Http),
            "https" => Ok(ProxyProtocol::Https),
            "socks4" => Ok(ProxyProtocol::Socks4),
            "socks5" => Ok(ProxyProtocol::Socks5),
            "socks5h" => Ok(ProxyProtocol::Socks5h),
            other => Err(EgressError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Username/password kept in their URL-encoded form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A network path for one upstream call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EgressDescriptor {
    Direct,
    Proxy {
        protocol: ProxyProtocol,
        host: String,
        port: u16,
        auth: Option<ProxyAuth>,
    },
}

impl EgressDescriptor {
    pub fn proxy(protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        EgressDescriptor::Proxy {
            protocol,
            host: host.into(),
            port,
            auth: None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, EgressDescriptor::Direct)
    }

    /// Full proxy URL including credentials, for the HTTP client only.
    /// `None` for a direct connection.
    pub fn proxy_url(&self) -> Option<String> {
        match self {
            EgressDescriptor::Direct => None,
            EgressDescriptor::Proxy {
                protocol,
                host,
                port,
                auth,
            } => Some(match auth {
                Some(auth) => format!(
                    "{}://{}:{}@{host}:{port}",
                    protocol.scheme(),
                    auth.username,
                    auth.password
                ),
                None => format!("{}://{host}:{port}", protocol.scheme()),
            }),
        }
    }
}

impl fmt::Display for EgressDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressDescriptor::Direct => f.write_str("direct"),
            EgressDescriptor::Proxy {
                protocol,
                host,
                port,
                auth: Some(auth),
            } => write!(f, "{}://{}:***@{host}:{port}", protocol.scheme(), auth.username),
            EgressDescriptor::Proxy {
                protocol,
                host,
                port,
                auth: None,
            } => write!(f, "{}://{host}:{port}", protocol.scheme()),
        }
    }
}

impl FromStr for EgressDescriptor {
    type Err = EgressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("direct") {
            return Ok(EgressDescriptor::Direct);
        }
        let parse_error = |reason: &str| EgressError::Parse {
            input: trimmed.to_string(),
            reason: reason.to_string(),
        };
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let url = Url::parse(&with_scheme).map_err(|err| parse_error(&err.to_string()))?;
        let protocol = ProxyProtocol::from_scheme(url.scheme())?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| parse_error("missing host"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| parse_error("missing port"))?;
        let auth = if url.username().is_empty() {
            None
        } else {
            Some(ProxyAuth {
                username: url.username().to_string(),
                password: url.password().unwrap_or_default().to_string(),
            })
        };
        Ok(EgressDescriptor::Proxy {
            protocol,
            host,
            port,
            auth,
        })
    }
}

impl Serialize for EgressDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EgressDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
