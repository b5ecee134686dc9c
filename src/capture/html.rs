use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kuchiki::traits::*;
use std::collections::HashMap;

/// Rewrites every `img` src in the page to an inline data URL so the exported
/// HTML renders without the origin server. Unreachable images fall back to
/// their absolute URL.
pub async fn inline_images(html: &str, base_url: &str, client: &reqwest::Client) -> Result<String> {
    let mut replacements = HashMap::new();
    for src in collect_image_srcs(html) {
        let Some(absolute) = resolve_src(base_url, &src) else {
            continue;
        };
        let value = match fetch_as_data_url(client, &absolute).await {
            Ok(data_url) => data_url,
            Err(err) => {
                tracing::debug!("failed to inline image {}: {}", absolute, err);
                absolute
            }
        };
        replacements.insert(src, value);
    }
    Ok(rewrite_image_srcs(html, &replacements))
}

/// All non-data `img` src values, deduplicated in document order.
pub(crate) fn collect_image_srcs(html: &str) -> Vec<String> {
    let document = kuchiki::parse_html().one(html);
    let mut srcs = Vec::new();
    let Ok(nodes) = document.select("img") else {
        return srcs;
    };
    for node in nodes {
        let attrs = node.attributes.borrow();
        if let Some(src) = attrs.get("src") {
            if !src.is_empty() && !src.starts_with("data:") && !srcs.iter().any(|s| s == src) {
                srcs.push(src.to_string());
            }
        }
    }
    srcs
}

pub(crate) fn rewrite_image_srcs(html: &str, replacements: &HashMap<String, String>) -> String {
    let document = kuchiki::parse_html().one(html);
    if let Ok(nodes) = document.select("img") {
        for node in nodes.collect::<Vec<_>>() {
            let current = node.attributes.borrow().get("src").map(|s| s.to_string());
            if let Some(current) = current {
                if let Some(replacement) = replacements.get(&current) {
                    node.attributes
                        .borrow_mut()
                        .insert("src", replacement.clone());
                }
            }
        }
    }
    document.to_string()
}

pub(crate) fn resolve_src(base_url: &str, src: &str) -> Option<String> {
    let base = reqwest::Url::parse(base_url).ok()?;
    base.join(src).ok().map(|url| url.to_string())
}

async fn fetch_as_data_url(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_only_remote_srcs() {
        let html = r#"<html><body>
            <img src="/a.png">
            <img src="data:image/png;base64,AAAA">
            <img src="https://cdn.example.com/b.jpg">
            <img src="/a.png">
            <img>
        </body></html>"#;
        let srcs = collect_image_srcs(html);
        assert_eq!(srcs, vec!["/a.png", "https://cdn.example.com/b.jpg"]);
    }

    #[test]
    fn rewrite_replaces_matching_srcs() {
        let html = r#"<html><body><img src="/a.png"><img src="/keep.png"></body></html>"#;
        let mut replacements = HashMap::new();
        replacements.insert("/a.png".to_string(), "data:image/png;base64,Zm9v".to_string());
        let output = rewrite_image_srcs(html, &replacements);
        assert!(output.contains("data:image/png;base64,Zm9v"));
        assert!(output.contains("/keep.png"));
    }

    #[test]
    fn relative_srcs_resolve_against_base() {
        assert_eq!(
            resolve_src("https://shop.example.com/item/42", "/img/a.png").as_deref(),
            Some("https://shop.example.com/img/a.png")
        );
        assert_eq!(
            resolve_src("https://shop.example.com/item/42", "https://cdn.example.com/b.png")
                .as_deref(),
            Some("https://cdn.example.com/b.png")
        );
        assert!(resolve_src("not a url", "/a.png").is_none());
    }
}
