//! Public key exchange encoding.
//!
//! Keys travel out-of-band as `base64(DER SubjectPublicKeyInfo)`, either
//! pasted as text or carried in a QR code whose payload is that same text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use p256::PublicKey;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};

use crate::error::CryptoError;

/// DER-encode a public key as `SubjectPublicKeyInfo`.
pub fn public_key_to_der(public: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Serialization(format!("SPKI encoding failed: {e}")))
}

/// Parse a DER `SubjectPublicKeyInfo` that must hold a P-256 point.
pub fn public_key_from_der(der: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_public_key_der(der)
        .map_err(|e| CryptoError::InvalidKey(format!("not a P-256 public key: {e}")))
}

/// Exchange text for already-encoded key bytes.
pub fn encode(public_key_der: &[u8]) -> String {
    BASE64.encode(public_key_der)
}

pub fn encode_public_key(public: &PublicKey) -> Result<String, CryptoError> {
    Ok(encode(&public_key_to_der(public)?))
}

/// Base64-decode exchange text into DER bytes and check they parse.
///
/// Pasted text is trimmed first.
pub fn decode_der(text: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::InvalidKey("empty key text".into()));
    }
    let der = BASE64
        .decode(trimmed)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))?;
    public_key_from_der(&der)?;
    Ok(der)
}

/// Decode exchange text into a public key.
pub fn decode(text: &str) -> Result<PublicKey, CryptoError> {
    let der = decode_der(text)?;
    public_key_from_der(&der)
}

#[cfg(feature = "qr")]
pub use qr::{QrBitmap, QUIET_ZONE, render_qr, render_qr_terminal};

#[cfg(feature = "qr")]
mod qr {
    use qrcode::{Color, QrCode};

    use crate::error::CryptoError;

    /// Light modules around the symbol (ISO/IEC 18004 minimum).
    pub const QUIET_ZONE: usize = 4;

    /// A square black/white raster of a QR code.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct QrBitmap {
        size: usize,
        /// Row-major, `true` = black.
        pixels: Vec<bool>,
    }

    impl QrBitmap {
        pub const fn size(&self) -> usize {
            self.size
        }

        /// Whether the pixel at (`x`, `y`) is black. Out of range is white.
        pub fn is_set(&self, x: usize, y: usize) -> bool {
            x < self.size && y < self.size && self.pixels[y * self.size + x]
        }

        /// Count of black pixels.
        pub fn dark_pixels(&self) -> usize {
            self.pixels.iter().filter(|p| **p).count()
        }
    }

    struct Modules {
        width: usize,
        colors: Vec<Color>,
    }

    impl Modules {
        fn encode(text: &str) -> Result<Self, CryptoError> {
            let code = QrCode::new(text.as_bytes())
                .map_err(|e| CryptoError::Serialization(format!("QR encoding failed: {e}")))?;
            Ok(Self {
                width: code.width(),
                colors: code.to_colors(),
            })
        }

        /// Total side length including the quiet zone.
        const fn span(&self) -> usize {
            self.width + 2 * QUIET_ZONE
        }

        /// Module at (`x`, `y`) in quiet-zone coordinates.
        fn dark(&self, x: usize, y: usize) -> bool {
            if x < QUIET_ZONE || y < QUIET_ZONE {
                return false;
            }
            let (qx, qy) = (x - QUIET_ZONE, y - QUIET_ZONE);
            qx < self.width && qy < self.width && self.colors[qy * self.width + qx] == Color::Dark
        }
    }

    /// Render `text` as a `size`×`size` bitmap.
    ///
    /// Modules are scaled by the largest integer factor that fits and the
    /// symbol is centred; the remainder is white border.
    pub fn render_qr(text: &str, size: usize) -> Result<QrBitmap, CryptoError> {
        let modules = Modules::encode(text)?;
        let span = modules.span();
        if size < span {
            return Err(CryptoError::Serialization(format!(
                "QR bitmap of {size}px cannot hold {span} modules"
            )));
        }
        let scale = size / span;
        let offset = (size - span * scale) / 2;

        let mut pixels = vec![false; size * size];
        for y in 0..size {
            for x in 0..size {
                if x < offset || y < offset {
                    continue;
                }
                let (mx, my) = ((x - offset) / scale, (y - offset) / scale);
                if mx < span && my < span && modules.dark(mx, my) {
                    pixels[y * size + x] = true;
                }
            }
        }
        Ok(QrBitmap { size, pixels })
    }

    /// Render `text` as a QR code using Unicode half blocks, two module
    /// rows per line, for display in a terminal.
    pub fn render_qr_terminal(text: &str) -> Result<String, CryptoError> {
        let modules = Modules::encode(text)?;
        let span = modules.span();
        let mut out = String::with_capacity(span * (span / 2 + 1) * 3);
        for y in (0..span).step_by(2) {
            for x in 0..span {
                let top = modules.dark(x, y);
                let bottom = modules.dark(x, y + 1);
                out.push(match (top, bottom) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn random_key() -> PublicKey {
        p256::SecretKey::random(&mut rand::rngs::OsRng).public_key()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let key = random_key();
        let text = encode_public_key(&key).unwrap();
        assert_eq!(decode(&text).unwrap(), key);
    }

    #[test]
    fn decode_trims_pasted_text() {
        let key = random_key();
        let text = format!("\n  {}  \n", encode_public_key(&key).unwrap());
        assert_eq!(decode(&text).unwrap(), key);
    }

    #[test]
    fn fingerprint_stable_across_roundtrips() {
        let key = random_key();
        let der = public_key_to_der(&key).unwrap();
        let again = decode_der(&encode(&der)).unwrap();
        assert_eq!(fingerprint(&der), fingerprint(&again));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(
            decode("%%% not base64 %%%"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn decode_rejects_empty_text() {
        assert!(matches!(decode("   "), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn decode_rejects_valid_base64_that_is_not_a_key() {
        let text = BASE64.encode(b"definitely not a SubjectPublicKeyInfo");
        assert!(matches!(decode(&text), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn decode_rejects_point_not_on_curve() {
        let mut der = public_key_to_der(&random_key()).unwrap();
        // Corrupt the y-coordinate of the uncompressed point.
        let last = der.len() - 1;
        der[last] ^= 0x01;
        assert!(matches!(
            decode(&encode(&der)),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[cfg(feature = "qr")]
    #[test]
    fn qr_bitmap_is_square_and_has_finder_pattern() {
        let text = encode_public_key(&random_key()).unwrap();
        let bmp = render_qr(&text, 512).unwrap();
        assert_eq!(bmp.size(), 512);
        assert!(bmp.dark_pixels() > 0);
        // Corners are quiet zone.
        assert!(!bmp.is_set(0, 0));
        assert!(!bmp.is_set(511, 511));
    }

    #[cfg(feature = "qr")]
    #[test]
    fn qr_rejects_tiny_bitmap() {
        let text = encode_public_key(&random_key()).unwrap();
        assert!(render_qr(&text, 10).is_err());
    }

    #[cfg(feature = "qr")]
    #[test]
    fn qr_terminal_rendering_is_deterministic() {
        let text = encode_public_key(&random_key()).unwrap();
        let a = render_qr_terminal(&text).unwrap();
        let b = render_qr_terminal(&text).unwrap();
        assert_eq!(a, b);
        assert!(a.contains('█'));
    }
}
