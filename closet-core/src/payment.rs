use chrono::{DateTime, Utc};
use closet_shared::Money;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::BTreeMap;

use crate::{CoreError, CoreResult};

type HmacSha512 = Hmac<Sha512>;

/// Field carrying the checksum in both redirect URLs and callbacks.
pub const SIGNATURE_FIELD: &str = "secure_hash";
const SIGNATURE_TYPE_FIELD: &str = "secure_hash_type";
const SUCCESS_CODE: &str = "00";

/// What the reconciler asks the gateway to charge.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub reference: String,
    pub amount: Money,
    pub order_info: String,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayOutcome {
    Succeeded,
    Failed { code: String },
}

/// A callback whose checksum has been verified. Only these fields are trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub reference: String,
    pub outcome: GatewayOutcome,
    pub amount_cents: Option<i64>,
    pub gateway_transaction_no: Option<String>,
    pub bank_code: Option<String>,
}

/// Port to the external payment gateway.
pub trait PaymentGateway: Send + Sync {
    /// Build the URL the customer is redirected to in order to pay.
    fn build_payment_url(&self, request: &PaymentRequest) -> CoreResult<String>;

    /// Verify and parse a callback. Fails with `InvalidSignature` when the
    /// checksum does not match the shared secret.
    fn verify_callback(&self, params: &BTreeMap<String, String>) -> CoreResult<VerifiedCallback>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub merchant_code: String,
    pub hash_secret: String,
    pub payment_url: String,
    pub return_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_currency() -> String {
    "VND".to_string()
}

fn default_locale() -> String {
    "vn".to_string()
}

/// Redirect-style gateway: request and callback parameters are signed with
/// HMAC-SHA512 over the key-sorted, URL-encoded query string.
pub struct SignedUrlGateway {
    settings: GatewaySettings,
}

impl SignedUrlGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings }
    }

    fn canonical_query(params: &BTreeMap<String, String>) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            if key == SIGNATURE_FIELD || key == SIGNATURE_TYPE_FIELD || value.is_empty() {
                continue;
            }
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    fn mac(&self, payload: &str) -> CoreResult<HmacSha512> {
        let mut mac = HmacSha512::new_from_slice(self.settings.hash_secret.as_bytes())
            .map_err(|e| CoreError::InternalError(format!("Invalid gateway secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Hex-encoded signature of the given parameters.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> CoreResult<String> {
        let mac = self.mac(&Self::canonical_query(params))?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl PaymentGateway for SignedUrlGateway {
    fn build_payment_url(&self, request: &PaymentRequest) -> CoreResult<String> {
        if !request.amount.is_positive() {
            return Err(CoreError::ValidationError("Payment amount must be positive".to_string()));
        }

        let mut params = BTreeMap::new();
        params.insert("version".to_string(), "2.1.0".to_string());
        params.insert("command".to_string(), "pay".to_string());
        params.insert("merchant".to_string(), self.settings.merchant_code.clone());
        params.insert("amount".to_string(), request.amount.to_cents().to_string());
        params.insert("currency".to_string(), self.settings.currency.clone());
        params.insert("reference".to_string(), request.reference.clone());
        params.insert("order_info".to_string(), request.order_info.clone());
        params.insert("locale".to_string(), self.settings.locale.clone());
        params.insert("return_url".to_string(), self.settings.return_url.clone());
        params.insert("ip_addr".to_string(), request.client_ip.clone());
        params.insert("create_date".to_string(), request.created_at.format("%Y%m%d%H%M%S").to_string());

        let query = Self::canonical_query(&params);
        let signature = hex::encode(self.mac(&query)?.finalize().into_bytes());

        Ok(format!("{}?{}&{}={}", self.settings.payment_url, query, SIGNATURE_FIELD, signature))
    }

    fn verify_callback(&self, params: &BTreeMap<String, String>) -> CoreResult<VerifiedCallback> {
        let provided = params.get(SIGNATURE_FIELD).ok_or(CoreError::InvalidSignature)?;
        let provided = hex::decode(provided.to_ascii_lowercase()).map_err(|_| CoreError::InvalidSignature)?;

        self.mac(&Self::canonical_query(params))?
            .verify_slice(&provided)
            .map_err(|_| CoreError::InvalidSignature)?;

        let reference = params
            .get("reference")
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or_else(|| CoreError::ValidationError("Callback is missing the transaction reference".to_string()))?;

        let code = params.get("response_code").cloned().unwrap_or_default();
        let outcome = if code == SUCCESS_CODE {
            GatewayOutcome::Succeeded
        } else {
            GatewayOutcome::Failed { code }
        };

        Ok(VerifiedCallback {
            reference,
            outcome,
            amount_cents: params.get("amount").and_then(|a| a.parse().ok()),
            gateway_transaction_no: params.get("transaction_no").cloned(),
            bank_code: params.get("bank_code").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gateway() -> SignedUrlGateway {
        SignedUrlGateway::new(GatewaySettings {
            merchant_code: "CLOSET01".to_string(),
            hash_secret: "top-secret".to_string(),
            payment_url: "https://pay.example.com/checkout".to_string(),
            return_url: "https://closet.example.com/payments/return".to_string(),
            currency: default_currency(),
            locale: default_locale(),
        })
    }

    fn signed_callback(gw: &SignedUrlGateway, code: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("reference".to_string(), "TXN-1".to_string());
        params.insert("response_code".to_string(), code.to_string());
        params.insert("amount".to_string(), "10000".to_string());
        params.insert("transaction_no".to_string(), "987".to_string());
        let signature = gw.sign(&params).unwrap();
        params.insert(SIGNATURE_FIELD.to_string(), signature);
        params
    }

    #[test]
    fn test_payment_url_contains_amount_and_signature() {
        let gw = gateway();
        let url = gw
            .build_payment_url(&PaymentRequest {
                reference: "TXN-1".to_string(),
                amount: Money::new(dec!(250.50)),
                order_info: "Thanh toan don hang".to_string(),
                client_ip: "127.0.0.1".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();

        assert!(url.starts_with("https://pay.example.com/checkout?"));
        assert!(url.contains("amount=25050"));
        assert!(url.contains("reference=TXN-1"));
        assert!(url.contains("secure_hash="));
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let result = gateway().build_payment_url(&PaymentRequest {
            reference: "TXN-0".to_string(),
            amount: Money::ZERO,
            order_info: String::new(),
            client_ip: "127.0.0.1".to_string(),
            created_at: Utc::now(),
        });
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_valid_callback_is_accepted() {
        let gw = gateway();
        let params = signed_callback(&gw, "00");
        let callback = gw.verify_callback(&params).unwrap();
        assert_eq!(callback.reference, "TXN-1");
        assert_eq!(callback.outcome, GatewayOutcome::Succeeded);
        assert_eq!(callback.amount_cents, Some(10000));
    }

    #[test]
    fn test_failed_result_code() {
        let gw = gateway();
        let params = signed_callback(&gw, "24");
        let callback = gw.verify_callback(&params).unwrap();
        assert_eq!(callback.outcome, GatewayOutcome::Failed { code: "24".to_string() });
    }

    #[test]
    fn test_tampered_callback_is_rejected() {
        let gw = gateway();
        let mut params = signed_callback(&gw, "24");
        params.insert("response_code".to_string(), "00".to_string());
        assert!(matches!(gw.verify_callback(&params), Err(CoreError::InvalidSignature)));
    }

    #[test]
    fn test_missing_signature_is_rejected() {
        let gw = gateway();
        let mut params = signed_callback(&gw, "00");
        params.remove(SIGNATURE_FIELD);
        assert!(matches!(gw.verify_callback(&params), Err(CoreError::InvalidSignature)));
    }

    #[test]
    fn test_signature_from_other_secret_is_rejected() {
        let mut other_settings = gateway().settings.clone();
        other_settings.hash_secret = "another-secret".to_string();
        let forger = SignedUrlGateway::new(other_settings);
        let params = signed_callback(&forger, "00");
        assert!(matches!(gateway().verify_callback(&params), Err(CoreError::InvalidSignature)));
    }
}
