use secrecy::SecretString;

/// Connection settings shared by every component that talks to the directory.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub discovery_url: String,
    pub discovery_token: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(discovery_url: String) -> Self {
        Self {
            discovery_url,
            discovery_token: None,
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.discovery_token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let mut args = GlobalArgs::new("http://127.0.0.1:8500".to_string());
        assert_eq!(args.discovery_url, "http://127.0.0.1:8500");
        assert!(args.discovery_token.is_none());

        args.set_token(SecretString::from("consul-token".to_string()));
        assert_eq!(
            args.discovery_token.as_ref().map(ExposeSecret::expose_secret),
            Some("consul-token")
        );
        // Debug output never carries the token
        assert!(!format!("{args:?}").contains("consul-token"));
    }
}
