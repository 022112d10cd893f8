//! Handshake protocol definitions
//!
//! The hello is one client-type/flags byte, optionally followed by a UTF-8
//! key/value block carrying the client environment (locale, language,
//! country) and an opaque configuration value for the server. The block is
//! prefixed with its byte length as a big-endian u16. The server sends
//! nothing back; packet forwarding starts immediately after the hello.

use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Configuration block too large: {0} bytes")]
    ConfigTooLarge(usize),
}

/// Base client identifier carried in the low bits of the hello byte.
pub const CLIENT_TYPE: u8 = 0x03;

/// Set in the hello byte iff a configuration block follows.
pub const CONFIG_FOLLOWS: u8 = 0x80;

/// Client environment reported to the server in the hello block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleInfo {
    pub locale: String,
    pub language: String,
    pub country: String,
}

impl LocaleInfo {
    pub fn new(locale: &str, language: &str, country: &str) -> Self {
        Self {
            locale: locale.to_string(),
            language: language.to_string(),
            country: country.to_string(),
        }
    }

    /// Read the process locale from `LC_ALL`/`LANG` ("en_US.UTF-8" shape).
    /// Falls back to an empty locale when neither is set.
    pub fn detect() -> Self {
        let raw = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_default();
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Self {
        let locale = raw.split('.').next().unwrap_or("").to_string();
        let mut parts = locale.splitn(2, '_');
        let language = parts.next().unwrap_or("").to_string();
        let country = parts.next().unwrap_or("").to_string();
        Self {
            locale,
            language,
            country,
        }
    }
}

/// Encode the hello: flags byte plus the optional length-prefixed
/// configuration block.
pub fn encode_hello(
    locale: &LocaleInfo,
    config_data: Option<&str>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut flags = CLIENT_TYPE;
    if config_data.is_some() {
        flags |= CONFIG_FOLLOWS;
    }

    let mut hello = vec![flags];

    if let Some(config) = config_data {
        let mut block = String::new();
        block.push_str(&format!("locale={}\n", locale.locale));
        block.push_str(&format!("language={}\n", locale.language));
        block.push_str(&format!("country={}\n", locale.country));
        block.push_str(&format!("config={}\n", config));

        let bytes = block.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(ProtocolError::ConfigTooLarge(bytes.len()));
        }
        hello.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        hello.extend_from_slice(bytes);
    }

    Ok(hello)
}
