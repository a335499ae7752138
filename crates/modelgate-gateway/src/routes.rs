//! Standard routes and the backstop policy
//!
//! The upstream model server is known to serve a fixed set of API paths.
//! Plug-in routes on one of those paths stay forwarded unless their router
//! opts out; plug-in routes anywhere else are always backstopped, because
//! forwarding them could only produce an upstream 404.

/// Paths (relative to the API prefix) the upstream model server serves
pub const STANDARD_ROUTES: &[&str] = &[
    "/models",
    "/modelelement",
    "/modeluris",
    "/server/ping",
    "/server/configure",
    "/subscribe",
    "/close",
    "/save",
    "/saveall",
    "/undo",
    "/redo",
    "/transaction",
    "/validation",
    "/validation/constraints",
    "/typeschema",
    "/uischema",
];

/// Whether a relative path is one the upstream is known to serve
pub fn is_standard(path: &str) -> bool {
    STANDARD_ROUTES.contains(&path)
}

/// Decide whether a plug-in route must be served locally.
///
/// `forward_to_upstream` is the contributing router's flag; `None` means
/// the router did not say, which keeps standard routes with upstream and
/// claims everything else.
pub fn is_backstopped(path: &str, forward_to_upstream: Option<bool>) -> bool {
    if is_standard(path) {
        forward_to_upstream == Some(false)
    } else {
        true
    }
}
