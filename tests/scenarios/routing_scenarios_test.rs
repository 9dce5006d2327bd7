// End-to-end routing scenarios through the public router API

use cms_edge::routing::{RouteDecision, RouteStage};
use cms_edge::smuggle::QueryCodec;

use super::test_harness::{evaluate, router_with, rule};

#[test]
fn test_cms_redirect_uses_status_and_short_ttl() {
    let (router, metrics) = router_with(vec![rule(1, "/old-page", "/new-page", 301)]);

    let routed = evaluate(&router, "/old-page");
    assert_eq!(routed.stage, RouteStage::RedirectLookup);
    assert_eq!(
        routed.decision,
        RouteDecision::Redirect {
            location: "/new-page".to_string(),
            status: 301,
            cache_control: Some("public, max-age=600".to_string()),
        }
    );
    assert_eq!(metrics.get_redirect_hits(), 1);
}

#[test]
fn test_redirect_lookup_ignores_case_and_host() {
    let (router, _) = router_with(vec![rule(1, "https://www.example.com/Old-Page", "/new-page", 308)]);

    for target in ["/old-page", "/OLD-PAGE", "/Old-Page"] {
        let routed = evaluate(&router, target);
        assert!(
            matches!(routed.decision, RouteDecision::Redirect { status: 308, .. }),
            "{target}"
        );
    }
}

#[test]
fn test_root_never_redirects() {
    let (router, metrics) = router_with(vec![rule(1, "/", "/home", 301)]);

    let routed = evaluate(&router, "/");
    assert_ne!(routed.stage, RouteStage::RedirectLookup);
    assert!(!matches!(routed.decision, RouteDecision::Redirect { .. }));
    assert_eq!(metrics.get_redirect_hits(), 0);
}

#[test]
fn test_lang_query_moves_into_path() {
    let (router, _) = router_with(vec![]);

    let routed = evaluate(&router, "/some/path?lang=fr");
    assert_eq!(routed.stage, RouteStage::LegacyLangQuery);
    assert_eq!(
        routed.decision,
        RouteDecision::Redirect {
            location: "/fr/some/path".to_string(),
            status: 307,
            cache_control: None,
        }
    );
}

#[test]
fn test_whitelisted_params_survive_the_rewrite() {
    let (router, _) = router_with(vec![]);

    let routed = evaluate(&router, "/pricing?audience=enterprise&utm_source=x");
    let RouteDecision::Rewrite { path, query } = routed.decision else {
        panic!("expected an internal rewrite, got {:?}", routed.decision);
    };
    assert_eq!(query, None);
    assert!(!path.contains("utm_source"));

    let (clean, params) = QueryCodec::split_smuggled(&path);
    assert_eq!(clean, "/en-us/pricing");
    let params = params.expect("smuggled segment");
    assert_eq!(params.get("audience").map(String::as_str), Some("enterprise"));
    assert!(!params.contains_key("utm_source"));
}

#[test]
fn test_docs_pass_through_without_locale() {
    let (router, _) = router_with(vec![]);

    let routed = evaluate(&router, "/docs/setup");
    assert_eq!(routed.stage, RouteStage::DocsBypass);
    assert_eq!(routed.decision, RouteDecision::PassThrough);
}

#[test]
fn test_api_routes_reach_the_origin_untouched() {
    let (router, metrics) = router_with(vec![]);

    for target in [
        "/api/search?q=shoes",
        "/api/preview?region=emea&x=1",
        "/_next/data/build/pricing.json?audience=y",
        "/_next/data/build/pricing?audience=y",
        "/api/x?lang=fr",
    ] {
        let routed = evaluate(&router, target);
        assert_eq!(routed.decision, RouteDecision::PassThrough, "{target}");
    }
    assert_eq!(metrics.get_smuggled_blobs(), 0);

    let routed = evaluate(&router, "/api/search?q=shoes");
    assert_eq!(routed.stage, RouteStage::InternalBypass);
}

#[test]
fn test_static_asset_skips_redirect_table() {
    let (router, metrics) = router_with(vec![rule(1, "/page.png", "/other.png", 301)]);

    let routed = evaluate(&router, "/page.png");
    assert_eq!(routed.stage, RouteStage::StaticAsset);
    assert_eq!(routed.decision, RouteDecision::PassThrough);
    assert_eq!(metrics.get_redirect_hits(), 0);
    assert_eq!(metrics.get_bloom_negatives(), 0);
}

#[test]
fn test_absolute_destination_gets_long_ttl() {
    let (router, _) = router_with(vec![rule(2, "/partner", "https://partner.example.com/landing", 302)]);

    assert_eq!(
        evaluate(&router, "/partner?ref=nav").decision,
        RouteDecision::Redirect {
            location: "https://partner.example.com/landing".to_string(),
            status: 302,
            cache_control: Some("public, max-age=3600".to_string()),
        }
    );
}

#[test]
fn test_preview_handshake_wins_over_everything() {
    let (router, _) = router_with(vec![rule(1, "/old-page", "/new-page", 301)]);

    let routed = evaluate(&router, "/fr/old-page?previewKey=abc&pageId=42");
    assert_eq!(routed.stage, RouteStage::PreviewHandshake);
    let RouteDecision::Redirect { location, status, .. } = routed.decision else {
        panic!("expected preview redirect");
    };
    assert_eq!(status, 307);
    assert!(location.starts_with("/api/preview?"));
    assert!(location.contains("locale=fr"));
    assert!(location.contains("id=42"));
    assert!(location.contains("key=abc"));
}

#[test]
fn test_content_id_rewrites_to_resolver_endpoint() {
    let (router, _) = router_with(vec![]);

    assert_eq!(
        evaluate(&router, "/anything?pageId=17").decision,
        RouteDecision::Rewrite {
            path: "/api/resolve-page".to_string(),
            query: Some("id=17".to_string()),
        }
    );
    // Not a positive integer: ignored
    assert_eq!(
        evaluate(&router, "/anything?pageId=0").stage,
        RouteStage::LocaleRewrite
    );
    assert_eq!(
        evaluate(&router, "/anything?pageId=abc").stage,
        RouteStage::LocaleRewrite
    );
}

#[test]
fn test_every_decision_is_counted_once() {
    let (router, metrics) = router_with(vec![rule(1, "/old-page", "/new-page", 301)]);

    for target in ["/old-page", "/docs", "/pricing", "/fr/pricing"] {
        let routed = evaluate(&router, target);
        metrics.record_decision(routed.decision.kind(), routed.stage.name());
    }

    assert_eq!(metrics.get_decision_count("redirect"), 1);
    assert_eq!(metrics.get_decision_count("rewrite"), 1);
    assert_eq!(metrics.get_decision_count("pass"), 2);
}
