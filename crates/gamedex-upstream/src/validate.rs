//! Completeness classification and field derivation for fetched apps.

use gamedex_core::{AppId, CatalogRecord, Classified, InvalidRecord, NOT_AVAILABLE, NO_TAGS_FOUND};
use scraper::Html;

use crate::types::{AppDetail, Popularity};

pub const UNKNOWN: &str = "Unknown";
pub const FULL_AUDIO_FOOTNOTE: &str = "<br><strong>*</strong>languages with full audio support";
pub const TOP_TAG_LIMIT: usize = 5;

const NO_IMAGE: &str = "No image available";
const NO_DESCRIPTION: &str = "No description available";
const PRICE_NOT_AVAILABLE: &str = "Price not available";

/// Decode HTML character references. Anything resembling a tag stays as text.
pub fn decode_html(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    // With every `<` escaped the tokenizer never leaves the data state.
    text_content(&raw.replace('<', "&lt;"))
}

/// Drop markup and decode references, leaving the text content.
pub fn strip_markup(raw: &str) -> String {
    if !raw.contains('&') && !raw.contains('<') {
        return raw.to_string();
    }
    text_content(raw)
}

fn text_content(fragment: &str) -> String {
    Html::parse_fragment(fragment).root_element().text().collect()
}

/// Complete iff both lists hold at least one entry that is neither empty nor `Unknown`.
pub fn is_complete(developers: &[String], publishers: &[String]) -> bool {
    let named = |list: &[String]| list.iter().any(|v| !v.trim().is_empty() && v != UNKNOWN);
    named(developers) && named(publishers)
}

/// Classify one fetched app. Incomplete apps keep only ID and Name.
pub fn classify(id: AppId, detail: &AppDetail, popularity: &Popularity) -> Classified {
    let name = decode_html(detail.name.as_deref().unwrap_or(UNKNOWN));
    let developers = detail.developers.as_deref().unwrap_or_default();
    let publishers = detail.publishers.as_deref().unwrap_or_default();
    if !is_complete(developers, publishers) {
        return Classified::Incomplete(InvalidRecord { id, name });
    }

    let languages = parse_languages(detail.supported_languages.as_deref().unwrap_or(NOT_AVAILABLE));
    Classified::Complete(CatalogRecord {
        id,
        name,
        image_url: decode_html(detail.header_image.as_deref().unwrap_or(NO_IMAGE)),
        price: decode_html(&derive_price(detail)),
        developer: decode_html(first_or_unknown(developers)),
        publisher: decode_html(first_or_unknown(publishers)),
        positive_reviews: popularity.positive,
        negative_reviews: popularity.negative,
        day_peak: popularity.peak_concurrent,
        top_tags: top_tags(&popularity.tags).iter().map(|t| decode_html(t)).collect(),
        languages_sub: languages.subtitles,
        languages_audio: languages.full_audio,
        short_desc: decode_html(detail.short_description.as_deref().unwrap_or(NO_DESCRIPTION)),
        release_date: decode_html(
            detail
                .release_date
                .as_ref()
                .map(|r| r.date.as_str())
                .unwrap_or(UNKNOWN),
        ),
        platforms: detail
            .platforms
            .map(|p| p.available().join(", "))
            .unwrap_or_default(),
    })
}

fn first_or_unknown(list: &[String]) -> &str {
    list.first().map(String::as_str).unwrap_or(UNKNOWN)
}

/// Free, then the formatted price, then `Coming Soon`, then the first
/// package-level price, then `N/A`.
pub fn derive_price(detail: &AppDetail) -> String {
    if detail.is_free {
        return "Free".to_string();
    }
    if let Some(overview) = &detail.price_overview {
        return overview
            .final_formatted
            .clone()
            .unwrap_or_else(|| PRICE_NOT_AVAILABLE.to_string());
    }
    if detail.release_date.as_ref().is_some_and(|r| r.coming_soon) {
        return "Coming Soon".to_string();
    }
    detail
        .packages
        .iter()
        .find_map(|package| {
            let price = package.as_object()?.get("price")?;
            Some(match price {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
        .unwrap_or_else(|| "N/A".to_string())
}

/// Highest-weighted tag names first, at most [`TOP_TAG_LIMIT`].
pub fn top_tags(weights: &[(String, u64)]) -> Vec<String> {
    if weights.is_empty() {
        return vec![NO_TAGS_FOUND.to_string()];
    }
    let mut ranked: Vec<&(String, u64)> = weights.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(TOP_TAG_LIMIT)
        .map(|(tag, _)| tag.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages {
    pub subtitles: Vec<String>,
    pub full_audio: Vec<String>,
}

/// Split the store's supported-languages markup. Entries marked with `*` have full audio.
pub fn parse_languages(raw: &str) -> Languages {
    let text = strip_markup(&raw.replace(FULL_AUDIO_FOOTNOTE, ""));
    let entries: Vec<&str> = text.split(',').map(str::trim).filter(|l| !l.is_empty()).collect();
    let clean = |l: &str| l.trim_matches('*').trim().to_string();

    let full_audio: Vec<String> = entries.iter().filter(|l| l.contains('*')).map(|l| clean(l)).collect();
    let subtitles: Vec<String> = entries.iter().map(|l| clean(l)).collect();
    let or_default = |v: Vec<String>| {
        if v.is_empty() {
            vec![NOT_AVAILABLE.to_string()]
        } else {
            v
        }
    };
    Languages {
        subtitles: or_default(subtitles),
        full_audio: or_default(full_audio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlatformFlags, PriceOverview, ReleaseInfo};

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn detail(devs: &[&str], pubs: &[&str]) -> AppDetail {
        AppDetail {
            name: Some("Tom &amp; Jerry".into()),
            developers: Some(strings(devs)),
            publishers: Some(strings(pubs)),
            ..Default::default()
        }
    }

    #[test]
    fn decoding_keeps_angle_bracket_text() {
        assert_eq!(decode_html("Foo <Bar> &amp; Baz"), "Foo <Bar> & Baz");
        assert_eq!(decode_html("a<b and c"), "a<b and c");
        assert_eq!(decode_html("AT&T &lt;3 &#39;99"), "AT&T <3 '99");
        assert_eq!(decode_html("<b>plain</b>"), "<b>plain</b>");
        assert_eq!(strip_markup("<b>bold</b> &amp; plain"), "bold & plain");
    }

    #[test]
    fn angle_brackets_survive_in_complete_records() {
        let mut d = detail(&["<Studio>"], &["Acme"]);
        d.name = Some("Zero <Escape> &amp; Co".into());
        let Classified::Complete(record) = classify(3, &d, &Popularity::default()) else {
            panic!("expected complete");
        };
        assert_eq!(record.name, "Zero <Escape> & Co");
        assert_eq!(record.developer, "<Studio>");
    }

    #[test]
    fn completeness_requires_named_developer_and_publisher() {
        assert!(!is_complete(&strings(&["Unknown"]), &strings(&["Acme"])));
        assert!(is_complete(&strings(&["Acme"]), &strings(&["Acme"])));
        assert!(!is_complete(&[], &[]));
        assert!(!is_complete(&strings(&["", "Unknown"]), &strings(&["Acme"])));
        assert!(is_complete(&strings(&["", "Acme"]), &strings(&["Unknown", "Acme"])));
    }

    #[test]
    fn incomplete_keeps_only_id_and_decoded_name() {
        let out = classify(5, &detail(&["Unknown"], &["Acme"]), &Popularity::default());
        assert_eq!(
            out,
            Classified::Incomplete(InvalidRecord {
                id: 5,
                name: "Tom & Jerry".into()
            })
        );
    }

    #[test]
    fn tags_rank_by_weight_and_keep_five() {
        let weights = vec![
            ("RPG".to_string(), 500),
            ("Indie".to_string(), 300),
            ("Action".to_string(), 800),
            ("Co-op".to_string(), 50),
            ("Pixel Graphics".to_string(), 10),
            ("Retro".to_string(), 5),
        ];
        assert_eq!(
            top_tags(&weights),
            strings(&["Action", "RPG", "Indie", "Co-op", "Pixel Graphics"])
        );
        assert_eq!(top_tags(&[]), strings(&[NO_TAGS_FOUND]));
    }

    #[test]
    fn languages_split_full_audio_from_subtitles() {
        let raw = "English<strong>*</strong>, French, German<strong>*</strong><br><strong>*</strong>languages with full audio support";
        let parsed = parse_languages(raw);
        assert_eq!(parsed.subtitles, strings(&["English", "French", "German"]));
        assert_eq!(parsed.full_audio, strings(&["English", "German"]));

        let none = parse_languages(NOT_AVAILABLE);
        assert_eq!(none.subtitles, strings(&[NOT_AVAILABLE]));
        assert_eq!(none.full_audio, strings(&[NOT_AVAILABLE]));

        let empty = parse_languages("");
        assert_eq!(empty.subtitles, strings(&[NOT_AVAILABLE]));
    }

    #[test]
    fn price_follows_fallback_chain() {
        let mut d = AppDetail::default();
        assert_eq!(derive_price(&d), "N/A");

        d.packages = vec![serde_json::json!(1234), serde_json::json!({"price": "$4.99"})];
        assert_eq!(derive_price(&d), "$4.99");

        d.release_date = Some(ReleaseInfo {
            coming_soon: true,
            date: "Coming soon".into(),
        });
        assert_eq!(derive_price(&d), "Coming Soon");

        d.price_overview = Some(PriceOverview {
            final_formatted: Some("$19.99".into()),
        });
        assert_eq!(derive_price(&d), "$19.99");

        d.is_free = true;
        assert_eq!(derive_price(&d), "Free");
    }

    #[test]
    fn complete_record_derives_all_fields() {
        let mut d = detail(&["Valve", "Other"], &["Valve"]);
        d.header_image = Some("https://cdn/x.jpg?a=1&amp;b=2".into());
        d.short_description = Some("Puzzles &quot;with&quot; portals".into());
        d.platforms = Some(PlatformFlags {
            windows: true,
            mac: true,
            linux: false,
        });
        d.release_date = Some(ReleaseInfo {
            coming_soon: false,
            date: "Oct 10, 2007".into(),
        });
        let popularity = Popularity {
            positive: 9000,
            negative: 100,
            peak_concurrent: 42,
            tags: vec![("Puzzle".into(), 9), ("Sci-fi".into(), 3)],
        };

        let Classified::Complete(record) = classify(10, &d, &popularity) else {
            panic!("expected complete");
        };
        assert_eq!(record.name, "Tom & Jerry");
        assert_eq!(record.developer, "Valve");
        assert_eq!(record.image_url, "https://cdn/x.jpg?a=1&b=2");
        assert_eq!(record.short_desc, "Puzzles \"with\" portals");
        assert_eq!(record.platforms, "windows, mac");
        assert_eq!(record.price, "N/A");
        assert_eq!(record.top_tags, strings(&["Puzzle", "Sci-fi"]));
        assert_eq!(record.languages_sub, strings(&[NOT_AVAILABLE]));
        assert_eq!(record.total_reviews(), 9100);
        assert_eq!(record.day_peak, 42);
    }
}
