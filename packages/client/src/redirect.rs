//! Redirect chain accounting and `Location` resolution

use url::Url;

use crate::error::{Error, Kind};
use crate::request::Request;

/// Length of the `redirected_from` chain behind `id`.
pub(crate) fn hop_count(requests: &[Request], id: usize) -> usize {
    let mut hops = 0;
    let mut cursor = requests[id].redirected_from;
    while let Some(prev) = cursor {
        hops += 1;
        cursor = requests[prev.0].redirected_from;
    }
    hops
}

/// Resolve a `Location` header against the request that received it.
///
/// Absolute `http://`/`https://` locations are taken verbatim; anything else
/// is joined onto the current request's scheme, host and port, with a `/`
/// inserted when the location does not start with one.
pub(crate) fn resolve_location(base: &Url, location: &str) -> Result<Url, Error> {
    let absolute;
    let target = if location.starts_with("http://") || location.starts_with("https://") {
        location
    } else {
        let mut prefix = format!("{}://{}", base.scheme(), base.host_str().unwrap_or_default());
        if let Some(port) = base.port() {
            prefix.push(':');
            prefix.push_str(&port.to_string());
        }
        if !location.starts_with('/') {
            prefix.push('/');
        }
        prefix.push_str(location);
        absolute = prefix;
        &absolute
    };
    Url::parse(target).map_err(|e| {
        Error::new(Kind::InvalidRedirectUrl).with(format!("location {location:?}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(url: &str) -> Url {
        Url::parse(url).expect("base URL should parse")
    }

    #[test]
    fn absolute_location_is_used_verbatim() {
        let url = resolve_location(&base("http://a.example/x"), "https://b.example/y?z=1")
            .expect("resolve");
        assert_eq!(url.as_str(), "https://b.example/y?z=1");
    }

    #[test]
    fn rooted_location_keeps_host_and_port() {
        let url = resolve_location(&base("http://a.example:8080/x/y"), "/next").expect("resolve");
        assert_eq!(url.as_str(), "http://a.example:8080/next");
    }

    #[test]
    fn bare_location_gets_a_leading_slash() {
        let url = resolve_location(&base("https://a.example/x"), "next").expect("resolve");
        assert_eq!(url.as_str(), "https://a.example/next");
    }

    #[test]
    fn unparseable_location_is_rejected() {
        let err = resolve_location(&base("http://a.example/"), "http://[broken")
            .expect_err("must fail");
        assert_eq!(err.kind(), Kind::InvalidRedirectUrl);
    }
}
