//! Pairing Token Issuer
//!
//! Time-boxed storage of the current QR pairing token. The protocol
//! library emits a fresh token while unpaired; each one is valid for a
//! fixed window (60 seconds by default) and is presented to the operator
//! as a scannable code.
//!
//! The image encoding is a rendering convenience: if it fails, the raw
//! token stays retrievable and pairing still works.

use base64::Engine;
use qrcode::render::svg;
use qrcode::QrCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Default token validity window.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Non-expired pairing token as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PairingCode {
    /// Raw token string from the protocol library.
    pub token: String,
    /// Base64 SVG data URL, when image encoding succeeded.
    pub image: Option<String>,
    /// Whole seconds until expiry, floored.
    pub expires_in_secs: u64,
}

#[derive(Debug)]
struct IssuedToken {
    raw: String,
    image: Option<String>,
    expires_at: Instant,
}

/// Holds the current pairing token and its expiry.
#[derive(Debug, Clone)]
pub struct QrIssuer {
    inner: Arc<Mutex<Option<IssuedToken>>>,
    ttl: Duration,
}

impl Default for QrIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl QrIssuer {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            ttl,
        }
    }

    /// Store a fresh token with a full validity window, replacing any
    /// previous one. The image encoding is best-effort.
    pub fn set_token(&self, raw: &str) {
        let image = match encode_data_url(raw) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, "failed to render pairing token image; raw token still available");
                None
            }
        };

        let mut slot = self.inner.lock().unwrap();
        *slot = Some(IssuedToken {
            raw: raw.to_string(),
            image,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Current token, or `None` when absent or past expiry.
    ///
    /// An expired token reports absent even if it was never replaced.
    pub fn get_token(&self) -> Option<PairingCode> {
        let slot = self.inner.lock().unwrap();
        let token = slot.as_ref()?;

        let now = Instant::now();
        if now >= token.expires_at {
            return None;
        }

        Some(PairingCode {
            token: token.raw.clone(),
            image: token.image.clone(),
            expires_in_secs: (token.expires_at - now).as_secs(),
        })
    }

    /// Drop token, image, and expiry unconditionally.
    ///
    /// Called on successful connection, when pairing is no longer needed.
    pub fn clear(&self) {
        let mut slot = self.inner.lock().unwrap();
        *slot = None;
    }
}

/// Render a token as an SVG QR code wrapped in a base64 data URL.
///
/// Fails for tokens exceeding QR capacity; the caller treats that as a
/// missing image, not a missing token.
fn encode_data_url(token: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(token.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}
