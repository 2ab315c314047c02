//! Confinement identity and per-URI authorization.
//!
//! Grounded on `apparmor/ubuntu.h`'s `Context`/`RequestContextResolver`/
//! `RequestAuthenticator` split from the original implementation: resolving
//! a bus peer's confinement label is asynchronous (it queries AppArmor via
//! the bus daemon), while authorizing a URI against an already-resolved
//! label is a synchronous, in-memory policy check.

use regex::Regex;
use std::sync::OnceLock;

/// A bus peer's confinement label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    /// Trusted: unconditionally allowed to open any URI.
    Unconfined,
    /// `<package>_<app>_<version>`; `short_id` is `<package>_<app>`.
    Confined {
        full: String,
        package: String,
        app: String,
    },
}

fn confined_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<package>[^_]+)_(?P<app>[^_]+)_(?P<version>[^_]+)$")
            .expect("static apparmor label pattern is valid")
    })
}

impl Context {
    /// Classify a raw AppArmor profile name into `Unconfined` or
    /// `Confined`. Any name that isn't the literal `"unconfined"` and
    /// doesn't match the `<package>_<app>_<version>` shape is treated as
    /// confined with an empty package/app (the authorizer will then deny
    /// everything except `http(s)`, matching "all other cases deny").
    pub fn classify(raw: &str) -> Self {
        if raw == "unconfined" {
            return Context::Unconfined;
        }
        match confined_label_pattern().captures(raw) {
            Some(caps) => Context::Confined {
                full: raw.to_string(),
                package: caps["package"].to_string(),
                app: caps["app"].to_string(),
            },
            None => Context::Confined {
                full: raw.to_string(),
                package: String::new(),
                app: String::new(),
            },
        }
    }

    pub fn is_unconfined(&self) -> bool {
        matches!(self, Context::Unconfined)
    }

    /// `<package>_<app>`, or `None` for an unconfined context.
    pub fn short_id(&self) -> Option<String> {
        match self {
            Context::Unconfined => None,
            Context::Confined { package, app, .. } => Some(format!("{package}_{app}")),
        }
    }
}

/// Resolves a bus peer's confinement label. Implementations typically ask
/// the bus daemon for the peer's AppArmor security context.
pub trait AppContextResolver: Send + Sync + 'static {
    /// Resolves `peer_name` (a unique bus connection name) to its
    /// confinement context. `None` means the context could not be resolved
    /// (`ContextUnresolvable`, treated as denial by callers).
    fn resolve(&self, peer_name: &str) -> impl Future<Output = Option<Context>> + Send;
}

/// Decides whether a confinement label may open a given URI.
pub trait UriAuthorizer: Send + Sync + 'static {
    /// Returns `(ok, reason)`. `reason` is always populated (empty for an
    /// allow, human-readable for a deny) so it can be surfaced verbatim to
    /// the caller of `OpenUri`.
    fn authorize(&self, context: &Context, uri: &str) -> (bool, String);
}

/// The policy described in §4.4, parameterized only by which directories a
/// confined package is allowed to reach under `file://`.
pub struct DefaultUriAuthorizer {
    /// Directories every confined package may reach regardless of its own
    /// package id (e.g. shared media directories).
    pub shared_media_dirs: Vec<String>,
}

impl DefaultUriAuthorizer {
    pub fn new(shared_media_dirs: Vec<String>) -> Self {
        DefaultUriAuthorizer { shared_media_dirs }
    }

    fn package_data_dir(package_app: &str) -> String {
        format!("/home/.local/share/{package_app}")
    }
}

impl UriAuthorizer for DefaultUriAuthorizer {
    fn authorize(&self, context: &Context, uri: &str) -> (bool, String) {
        if context.is_unconfined() {
            return (true, String::new());
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            return (true, String::new());
        }

        if let Some(path) = uri.strip_prefix("file://") {
            let Some(short_id) = context.short_id() else {
                return (false, "confined context has no package identity".to_string());
            };
            let own_dir = Self::package_data_dir(&short_id);
            let allowed = path.starts_with(&own_dir)
                || self.shared_media_dirs.iter().any(|d| path.starts_with(d));
            if allowed {
                return (true, String::new());
            }
            return (
                false,
                format!("{short_id} is not permitted to open {uri}"),
            );
        }

        (
            false,
            format!("confined contexts may only open http(s) and file:// URIs, got {uri}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unconfined() {
        assert_eq!(Context::classify("unconfined"), Context::Unconfined);
    }

    #[test]
    fn classifies_confined_short_id() {
        let ctx = Context::classify("com.example.music_app_1.2.3");
        assert_eq!(
            ctx.short_id(),
            Some("com.example.music_app".to_string())
        );
    }

    #[test]
    fn unconfined_opens_anything() {
        let authz = DefaultUriAuthorizer::new(vec![]);
        let (ok, _) = authz.authorize(&Context::Unconfined, "file:///etc/passwd");
        assert!(ok);
    }

    #[test]
    fn confined_denies_outside_package_dir() {
        let authz = DefaultUriAuthorizer::new(vec![]);
        let ctx = Context::classify("pkg_app_1.0");
        let (ok, reason) = authz.authorize(&ctx, "file:///etc/passwd");
        assert!(!ok);
        assert!(!reason.is_empty());
    }

    #[test]
    fn confined_allows_own_package_dir() {
        let authz = DefaultUriAuthorizer::new(vec![]);
        let ctx = Context::classify("pkg_app_1.0");
        let (ok, _) = authz.authorize(
            &ctx,
            "file:///home/.local/share/pkg_app/track.mp3",
        );
        assert!(ok);
    }

    #[test]
    fn confined_allows_https() {
        let authz = DefaultUriAuthorizer::new(vec![]);
        let ctx = Context::classify("pkg_app_1.0");
        let (ok, _) = authz.authorize(&ctx, "https://example.com/stream");
        assert!(ok);
    }
}
