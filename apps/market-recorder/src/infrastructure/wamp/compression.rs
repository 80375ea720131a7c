//! Per-Message Compression Negotiation
//!
//! Builds the `permessage-deflate` offer sent in `Sec-WebSocket-Extensions`
//! and validates the server's response against it (RFC 7692).
//!
//! A server may decline by omitting the header. Any response naming another
//! extension, or a deflate response with parameters the offer does not
//! allow, fails the handshake.

use std::fmt;

/// Registered extension token.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Client `permessage-deflate` offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateOffer {
    /// Allow the server to require that the client reset its context per message.
    pub accept_no_context_takeover: bool,
    /// Allow the server to limit the client's window size.
    pub accept_max_window_bits: bool,
    /// Ask the server to reset its context per message.
    pub request_no_context_takeover: bool,
    /// Ask the server to limit its window to this many bits (8..=15).
    pub request_max_window_bits: Option<u8>,
}

impl Default for DeflateOffer {
    fn default() -> Self {
        Self {
            accept_no_context_takeover: true,
            accept_max_window_bits: false,
            request_no_context_takeover: false,
            request_max_window_bits: None,
        }
    }
}

impl DeflateOffer {
    /// Header value for `Sec-WebSocket-Extensions`.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut value = PERMESSAGE_DEFLATE.to_string();
        if self.accept_no_context_takeover {
            value.push_str("; client_no_context_takeover");
        }
        if self.accept_max_window_bits {
            value.push_str("; client_max_window_bits");
        }
        if self.request_no_context_takeover {
            value.push_str("; server_no_context_takeover");
        }
        if let Some(bits) = self.request_max_window_bits {
            value.push_str("; server_max_window_bits=");
            value.push_str(&bits.to_string());
        }
        value
    }

    /// Validate the server's `Sec-WebSocket-Extensions` response.
    ///
    /// # Errors
    ///
    /// Returns an error if the response names an extension other than
    /// `permessage-deflate`, names more than one, or carries a parameter this
    /// offer does not allow.
    pub fn negotiate(&self, response: Option<&str>) -> Result<Compression, NegotiationError> {
        let Some(response) = response.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(Compression::None);
        };

        let mut extensions = response.split(',').map(str::trim);
        let first = extensions.next().unwrap_or_default();
        if extensions.next().is_some() {
            return Err(NegotiationError::MultipleExtensions(response.to_string()));
        }

        let mut parts = first.split(';').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if !name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE) {
            return Err(NegotiationError::UnsupportedExtension(name.to_string()));
        }

        let mut params = DeflateParams::default();
        for part in parts.filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim().trim_matches('"'))),
                None => (part, None),
            };
            self.accept_param(&mut params, key, value)?;
        }

        Ok(Compression::Deflate(params))
    }

    fn accept_param(
        &self,
        params: &mut DeflateParams,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), NegotiationError> {
        let incompatible = || NegotiationError::IncompatibleParameter {
            name: key.to_string(),
            value: value.map(str::to_string),
        };

        match (key, value) {
            ("server_no_context_takeover", None) => params.server_no_context_takeover = true,
            ("client_no_context_takeover", None) if self.accept_no_context_takeover => {
                params.client_no_context_takeover = true;
            }
            ("server_max_window_bits", Some(raw)) => {
                let bits = window_bits(raw).ok_or_else(incompatible)?;
                if self.request_max_window_bits.is_some_and(|max| bits > max) {
                    return Err(incompatible());
                }
                params.server_max_window_bits = Some(bits);
            }
            ("client_max_window_bits", Some(raw)) if self.accept_max_window_bits => {
                params.client_max_window_bits = Some(window_bits(raw).ok_or_else(incompatible)?);
            }
            _ => return Err(incompatible()),
        }

        Ok(())
    }
}

fn window_bits(raw: &str) -> Option<u8> {
    raw.parse().ok().filter(|bits| (8..=15).contains(bits))
}

/// Parameters the server accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeflateParams {
    /// Server resets its context per message.
    pub server_no_context_takeover: bool,
    /// Client must reset its context per message.
    pub client_no_context_takeover: bool,
    /// Server window size.
    pub server_max_window_bits: Option<u8>,
    /// Client window size.
    pub client_max_window_bits: Option<u8>,
}

/// Negotiated compression for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Compression {
    /// Messages are sent uncompressed.
    #[default]
    None,
    /// `permessage-deflate` with the accepted parameters.
    Deflate(DeflateParams),
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Deflate(_) => f.write_str(PERMESSAGE_DEFLATE),
        }
    }
}

/// Errors validating the server's extension response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The server chose an extension that was not offered.
    #[error("server selected unsupported extension {0:?}")]
    UnsupportedExtension(String),

    /// The server selected more than one extension.
    #[error("server selected several extensions: {0:?}")]
    MultipleExtensions(String),

    /// A deflate parameter is not compatible with the offer.
    #[error("incompatible permessage-deflate parameter {name} (value {value:?})")]
    IncompatibleParameter {
        /// Parameter name.
        name: String,
        /// Parameter value, if any.
        value: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_offer_header() {
        assert_eq!(
            DeflateOffer::default().header_value(),
            "permessage-deflate; client_no_context_takeover"
        );
    }

    #[test]
    fn full_offer_header() {
        let offer = DeflateOffer {
            accept_no_context_takeover: false,
            accept_max_window_bits: true,
            request_no_context_takeover: true,
            request_max_window_bits: Some(12),
        };
        assert_eq!(
            offer.header_value(),
            "permessage-deflate; client_max_window_bits; server_no_context_takeover; server_max_window_bits=12"
        );
    }

    #[test]
    fn missing_response_means_uncompressed() {
        let offer = DeflateOffer::default();
        assert_eq!(offer.negotiate(None), Ok(Compression::None));
        assert_eq!(offer.negotiate(Some("  ")), Ok(Compression::None));
    }

    #[test]
    fn plain_deflate_response_is_accepted() {
        let offer = DeflateOffer::default();
        assert_eq!(
            offer.negotiate(Some("permessage-deflate")),
            Ok(Compression::Deflate(DeflateParams::default()))
        );
    }

    #[test]
    fn deflate_response_with_params_is_accepted() {
        let offer = DeflateOffer::default();
        let negotiated = offer
            .negotiate(Some(
                "permessage-deflate; client_no_context_takeover; server_max_window_bits=10",
            ))
            .unwrap();
        assert_eq!(
            negotiated,
            Compression::Deflate(DeflateParams {
                server_no_context_takeover: false,
                client_no_context_takeover: true,
                server_max_window_bits: Some(10),
                client_max_window_bits: None,
            })
        );
        assert_eq!(negotiated.to_string(), "permessage-deflate");
    }

    #[test_case("x-webkit-deflate-frame" ; "foreign extension")]
    #[test_case("permessage-deflate, permessage-deflate" ; "two extensions")]
    #[test_case("permessage-deflate; client_max_window_bits=9" ; "client window not offered")]
    #[test_case("permessage-deflate; server_max_window_bits=20" ; "window out of range")]
    #[test_case("permessage-deflate; mystery" ; "unknown parameter")]
    fn incompatible_responses_are_rejected(response: &str) {
        assert!(DeflateOffer::default().negotiate(Some(response)).is_err());
    }

    #[test]
    fn server_window_above_request_is_rejected() {
        let offer = DeflateOffer {
            request_max_window_bits: Some(10),
            ..DeflateOffer::default()
        };
        assert!(matches!(
            offer.negotiate(Some("permessage-deflate; server_max_window_bits=12")),
            Err(NegotiationError::IncompatibleParameter { .. })
        ));
    }
}
