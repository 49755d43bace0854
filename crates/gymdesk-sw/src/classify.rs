//! Request classification.
//!
//! Rules are checked in order and the first match wins, so an `/api/` path
//! stays an API request even when it ends in `.js`.

use gymdesk_core::ResourceClass;
use gymdesk_net::{Destination, Request};
use http::Method;

/// Whether the engine handles a request at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// Goes straight to the network untouched.
    Bypass,
    /// Handled by the strategy for this class.
    Handle(ResourceClass),
}

#[derive(Debug, Clone, Copy)]
enum Matcher {
    PathPrefix(&'static str),
    Destination(Destination),
    PathSuffixes(&'static [&'static str]),
}

impl Matcher {
    fn matches(&self, request: &Request) -> bool {
        let path = request.url.path();
        match self {
            Matcher::PathPrefix(prefix) => path.starts_with(prefix),
            Matcher::Destination(dest) => request.destination == *dest,
            Matcher::PathSuffixes(suffixes) => suffixes.iter().any(|s| path.ends_with(s)),
        }
    }
}

const RULES: &[(Matcher, ResourceClass)] = &[
    (Matcher::PathPrefix("/api/"), ResourceClass::Api),
    (Matcher::Destination(Destination::Image), ResourceClass::Image),
    (
        Matcher::PathSuffixes(&[".js", ".css", ".woff", ".woff2"]),
        ResourceClass::StaticAsset,
    ),
];

/// Decide whether a request is intercepted. Only GET requests are.
pub fn route(request: &Request) -> Interception {
    if request.method != Method::GET {
        return Interception::Bypass;
    }
    Interception::Handle(classify(request))
}

/// Map a request to its resource class. Total: unmatched requests are documents.
pub fn classify(request: &Request) -> ResourceClass {
    RULES
        .iter()
        .find(|(matcher, _)| matcher.matches(request))
        .map(|(_, class)| *class)
        .unwrap_or(ResourceClass::Document)
}
