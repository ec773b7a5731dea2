//! Resource identity.
//!
//! A [`Resource`] is the single in-process identity of one canonical URL within
//! a project. Lookups walk an ordered list of progressively normalized URL
//! alternatives so that resources persisted under older, less normalized forms
//! keep their identity.

mod alternatives;
mod resolver;
mod resource;
mod root;

pub use alternatives::{PhpBbSessionNormalizer, UrlNormalizer, url_alternatives};
pub use resource::{Resource, ResourceKey};
pub use root::RootResource;
