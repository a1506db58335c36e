//! Request signing for Binance USDT-M futures

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::common::errors::{BotError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on every authenticated request
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Hex-encoded HMAC-SHA256 of `payload` keyed with `secret`
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Encode `params`, append `recvWindow` and `timestamp`, then the signature
///
/// The signature covers the query exactly as sent, so the returned string
/// must be used verbatim as the request's query string.
pub fn signed_query(
    secret: &str,
    params: &[(&str, String)],
    recv_window_ms: u64,
    timestamp_ms: i64,
) -> Result<String> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("recvWindow", &recv_window_ms.to_string());
    serializer.append_pair("timestamp", &timestamp_ms.to_string());
    let query = serializer.finish();

    let signature = sign(secret, &query)?;
    Ok(format!("{}&signature={}", query, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_matches_published_example() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signed_query_layout() {
        let query = signed_query(
            "secret",
            &[("symbol", "BTCUSDT".to_string()), ("leverage", "5".to_string())],
            5000,
            1_700_000_000_000,
        )
        .unwrap();

        let (payload, signature) = query.split_once("&signature=").unwrap();
        assert_eq!(
            payload,
            "symbol=BTCUSDT&leverage=5&recvWindow=5000&timestamp=1700000000000"
        );
        assert_eq!(signature, sign("secret", payload).unwrap());
        assert_eq!(signature.len(), 64);
    }
}
