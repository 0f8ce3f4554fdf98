//! Splitting `https://` URLs for the reachability check and the HTTPS client.

use super::error::OtaError;

/// Longest host name accepted (the reachability check keeps it in a 128-byte buffer with a NUL)
pub const MAX_HOST_LEN: usize = 127;

/// Port used when the URL does not name one
pub const HTTPS_PORT: u16 = 443;

const SCHEME: &str = "https://";

/// Where an `https://` URL points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpsTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    /// Request target, `/` when the URL has no path
    pub path: &'a str,
}

/// Split `https://host[:port][/path]` into host, port and path.
///
/// The host runs until the first `/` (or the end of the string). An explicit
/// `:port` is honoured, otherwise [`HTTPS_PORT`] is used.
pub fn parse_https_host(url: &str) -> Result<HttpsTarget<'_>, OtaError> {
    let rest = url.strip_prefix(SCHEME).ok_or(OtaError::InvalidUrl)?;
    let (authority, path) = match rest.find('/') {
        Some(end) => (&rest[..end], &rest[end..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| OtaError::InvalidUrl)?;
            (host, port)
        }
        None => (authority, HTTPS_PORT),
    };

    if host.is_empty() || port == 0 {
        return Err(OtaError::InvalidUrl);
    }
    if host.len() > MAX_HOST_LEN {
        return Err(OtaError::HostTooLong);
    }

    Ok(HttpsTarget { host, port, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_default_port() {
        let target = parse_https_host("https://updates.example.com/fw/app.bin").unwrap();
        assert_eq!(target.host, "updates.example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.path, "/fw/app.bin");
    }

    #[test]
    fn test_host_without_path() {
        let target = parse_https_host("https://example.com").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.path, "/");
    }

    #[test]
    fn test_explicit_port() {
        let target = parse_https_host("https://10.0.0.2:8443/app.bin").unwrap();
        assert_eq!(target.host, "10.0.0.2");
        assert_eq!(target.port, 8443);
        assert_eq!(target.path, "/app.bin");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert_eq!(
            parse_https_host("http://example.com/app.bin"),
            Err(OtaError::InvalidUrl)
        );
        assert_eq!(parse_https_host(""), Err(OtaError::InvalidUrl));
        assert_eq!(parse_https_host("https:///app.bin"), Err(OtaError::InvalidUrl));
        assert_eq!(
            parse_https_host("https://example.com:https/"),
            Err(OtaError::InvalidUrl)
        );
    }

    #[test]
    fn test_host_length_limit() {
        let mut url = alloc::string::String::from("https://");
        url.push_str(&"a".repeat(MAX_HOST_LEN));
        assert!(parse_https_host(&url).is_ok());

        url.push('a');
        url.push_str("/fw.bin");
        assert_eq!(parse_https_host(&url), Err(OtaError::HostTooLong));
    }
}
