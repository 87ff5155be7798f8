use url::Url;

use super::{ProxyConfig, ProxyKind};

/// Query parameter carrying the originating source identifier.
pub const SOURCE_PARAM: &str = "moontv-source";

/// Query parameters for one proxied request.
///
/// The resource URL is always emitted first as `url`. Extra parameters keep
/// insertion order; setting an existing key replaces its value in place and
/// setting an empty value removes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyParams {
    url: String,
    extra: Vec<(String, String)>,
}

impl ProxyParams {
    pub fn new(resource_url: impl Into<String>) -> Self {
        Self {
            url: resource_url.into(),
            extra: Vec::new(),
        }
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        if key == "url" {
            self.url = value;
            return self;
        }
        if value.is_empty() {
            self.extra.retain(|(k, _)| k != key);
            return self;
        }
        match self.extra.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.extra.push((key.to_string(), value)),
        }
        self
    }

    pub fn set_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn source(self, source: Option<&str>) -> Self {
        self.set_opt(SOURCE_PARAM, source)
    }

    pub fn extend<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        pairs.into_iter().fold(self, |params, (k, v)| params.set(k, v))
    }

    pub fn resource_url(&self) -> &str {
        &self.url
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if key == "url" {
            return Some(self.url.as_str()).filter(|u| !u.is_empty());
        }
        self.extra
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        let url = (!self.url.is_empty()).then_some(("url", self.url.as_str()));
        url.into_iter()
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Login for an Xtream Codes portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtreamCredentials {
    pub username: String,
    pub password: String,
    pub action: Option<String>,
}

impl ProxyConfig {
    /// `{base}/api/proxy/{kind}?url=...&extras`, form-urlencoded.
    pub fn build_url(&self, kind: ProxyKind, params: &ProxyParams) -> Url {
        let mut url = self.base_url().clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "proxy", kind.as_str()]);
        }
        let mut pairs = params.pairs().peekable();
        if pairs.peek().is_some() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }

    pub fn build_m3u8_proxy_url(
        &self,
        resource_url: &str,
        source: Option<&str>,
        allow_cors: Option<bool>,
    ) -> Url {
        let params = ProxyParams::new(resource_url)
            .source(source)
            .set_opt("allowCORS", allow_cors);
        self.build_url(ProxyKind::M3u8, &params)
    }

    pub fn build_m3u_proxy_url(&self, resource_url: &str, source: Option<&str>) -> Url {
        self.build_url(ProxyKind::M3u, &ProxyParams::new(resource_url).source(source))
    }

    pub fn build_segment_proxy_url(&self, resource_url: &str, source: Option<&str>) -> Url {
        self.build_url(
            ProxyKind::Segment,
            &ProxyParams::new(resource_url).source(source),
        )
    }

    pub fn build_key_proxy_url(&self, resource_url: &str, source: Option<&str>) -> Url {
        self.build_url(ProxyKind::Key, &ProxyParams::new(resource_url).source(source))
    }

    pub fn build_logo_proxy_url(&self, resource_url: &str, source: Option<&str>) -> Url {
        self.build_url(ProxyKind::Logo, &ProxyParams::new(resource_url).source(source))
    }

    pub fn build_xtream_proxy_url(
        &self,
        resource_url: &str,
        credentials: &XtreamCredentials,
        extra: &[(&str, &str)],
    ) -> Url {
        let params = ProxyParams::new(resource_url)
            .set("username", &credentials.username)
            .set("password", &credentials.password)
            .set_opt("action", credentials.action.as_deref())
            .extend(extra.iter().copied());
        self.build_url(ProxyKind::Xtream, &params)
    }

    pub fn build_stalker_proxy_url(
        &self,
        resource_url: &str,
        mac_address: Option<&str>,
        extra: &[(&str, &str)],
    ) -> Url {
        let params = ProxyParams::new(resource_url)
            .set_opt("macAddress", mac_address)
            .extend(extra.iter().copied());
        self.build_url(ProxyKind::Stalker, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ProxyConfig {
        ProxyConfig::default()
    }

    fn decoded_param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn m3u8_with_source() {
        let url = local().build_m3u8_proxy_url("https://x.com/a.m3u8", Some("s1"), None);
        assert_eq!(
            url.as_str(),
            "http://localhost:3001/api/proxy/m3u8?url=https%3A%2F%2Fx.com%2Fa.m3u8&moontv-source=s1"
        );
    }

    #[test]
    fn m3u8_with_allow_cors() {
        let url = local().build_m3u8_proxy_url("https://x.com/a.m3u8", None, Some(true));
        assert_eq!(decoded_param(&url, "allowCORS").as_deref(), Some("true"));
        assert_eq!(decoded_param(&url, SOURCE_PARAM), None);
    }

    #[test]
    fn resource_url_round_trips() {
        let tricky = "https://cdn.example.com/live/ch 1/index.m3u8?token=a+b&exp=10#frag";
        for kind in ProxyKind::ALL {
            let url = local().build_url(kind, &ProxyParams::new(tricky));
            assert_eq!(url.path(), format!("/api/proxy/{}", kind.as_str()));
            assert_eq!(decoded_param(&url, "url").as_deref(), Some(tricky));
        }
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let config = ProxyConfig::new("https://edge.example.com/tvcors/").unwrap();
        let url = config.build_logo_proxy_url("https://img.example.com/l.png", None);
        assert_eq!(url.path(), "/tvcors/api/proxy/logo");
    }

    #[test]
    fn empty_resource_url_is_omitted() {
        let url = local().build_segment_proxy_url("", Some("s1"));
        assert_eq!(url.query(), Some("moontv-source=s1"));

        let bare = local().build_key_proxy_url("", None);
        assert_eq!(bare.query(), None);
        assert_eq!(bare.as_str(), "http://localhost:3001/api/proxy/key");
    }

    #[test]
    fn xtream_credentials_and_extras_in_order() {
        let creds = XtreamCredentials {
            username: "alice".into(),
            password: "p@ss word".into(),
            action: Some("get_live_streams".into()),
        };
        let url = local().build_xtream_proxy_url(
            "http://portal.example.com/player_api.php",
            &creds,
            &[("category_id", "7"), ("action", "get_vod_streams")],
        );
        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, ["url", "username", "password", "action", "category_id"]);
        assert_eq!(decoded_param(&url, "password").as_deref(), Some("p@ss word"));
        assert_eq!(decoded_param(&url, "action").as_deref(), Some("get_vod_streams"));
    }

    #[test]
    fn stalker_mac_address() {
        let url = local().build_stalker_proxy_url(
            "http://mag.example.com/portal.php",
            Some("00:1A:79:00:00:01"),
            &[],
        );
        assert_eq!(
            decoded_param(&url, "macAddress").as_deref(),
            Some("00:1A:79:00:00:01")
        );
    }

    #[test]
    fn empty_extra_clears_earlier_value() {
        let creds = XtreamCredentials {
            username: "alice".into(),
            password: "secret".into(),
            action: Some("get_live_streams".into()),
        };
        let url = local().build_xtream_proxy_url(
            "http://portal.example.com/player_api.php",
            &creds,
            &[("action", "")],
        );
        assert_eq!(decoded_param(&url, "action"), None);
        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, ["url", "username", "password"]);

        let params = ProxyParams::new("https://a").set("x", "1").set("url", "");
        assert_eq!(params.get("url"), None);
        let keys: Vec<&str> = params.pairs().map(|(k, _)| k).collect();
        assert_eq!(keys, ["x"]);
    }

    #[test]
    fn set_replaces_in_place_and_skips_empty() {
        let params = ProxyParams::new("https://a")
            .set("x", "1")
            .set("y", "2")
            .set("x", "3")
            .set("z", "");
        assert_eq!(params.get("x"), Some("3"));
        assert_eq!(params.get("z"), None);
        let keys: Vec<&str> = params.pairs().map(|(k, _)| k).collect();
        assert_eq!(keys, ["url", "x", "y"]);
    }

    #[test]
    fn url_key_overrides_resource() {
        let params = ProxyParams::new("https://a").set("url", "https://b");
        assert_eq!(params.resource_url(), "https://b");
    }
}
