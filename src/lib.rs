// CMS edge router library
// Redirects, locale routing and query smuggling for a CMS-backed site

pub mod config;
pub mod constants;
pub mod error;
pub mod locale;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod redirects;
pub mod refresh; // SIGHUP and interval redirect refresh
pub mod routing;
pub mod smuggle;
