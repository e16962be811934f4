use super::single::proxy_to_single;
use crate::models::ProxyConfig;
use crate::utils::base64::base64_encode;

/// Base64 of the raw list: the classic subscription body.
pub fn proxy_to_base64(configs: &[&ProxyConfig]) -> String {
    base64_encode(&proxy_to_single(configs))
}
