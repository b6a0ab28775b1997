use url::form_urlencoded::byte_serialize;

/// Optional URL-rewriting relay in front of every outbound fetch.
///
/// With a prefix such as `https://corsproxy.io/?` the target URL is
/// percent-encoded and appended to it; without one requests go direct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxy {
    prefix: Option<String>,
}

impl Proxy {
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn rewrite(&self, target: &str) -> String {
        match &self.prefix {
            Some(prefix) => {
                let encoded: String = byte_serialize(target.as_bytes()).collect();
                format!("{prefix}{encoded}")
            }
            None => target.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Proxy;

    #[test]
    fn direct_proxy_leaves_urls_alone() {
        let target = "https://api.are.na/v2/channels/moodboard";
        assert_eq!(Proxy::direct().rewrite(target), target);
        assert_eq!(Proxy::new(Some("  ".to_string())).rewrite(target), target);
    }

    #[test]
    fn prefixed_proxy_encodes_target() {
        let proxy = Proxy::new(Some("https://corsproxy.io/?".to_string()));
        assert_eq!(
            proxy.rewrite("https://api.are.na/v2/channels/x/contents?page=2&per_page=20"),
            "https://corsproxy.io/?https%3A%2F%2Fapi.are.na%2Fv2%2Fchannels%2Fx%2Fcontents%3Fpage%3D2%26per_page%3D20"
        );
    }
}
