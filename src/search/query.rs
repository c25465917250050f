//! Assembly of the boolean search query sent to the document index.

use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::IntoParams;

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductSearchParams {
    /// Free-text query over name and description.
    pub q: Option<String>,
    /// Exact category id filter.
    pub category: Option<i32>,
    pub price_min: Option<f32>,
    pub price_max: Option<f32>,
    /// 1-based page number.
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Build the `_search` request body. Free text becomes a multi-field match
/// with `name` weighted twice over `description`; category an exact term
/// filter; the price range clause is emitted only when at least one bound is
/// present, and carries only the bounds that are. Offset paging is handed to
/// the index via `from`/`size`.
pub fn build_product_query(params: &ProductSearchParams) -> Value {
    let mut must: Vec<Value> = Vec::new();
    let mut filter: Vec<Value> = Vec::new();

    if let Some(q) = params.q.as_deref().filter(|q| !q.trim().is_empty()) {
        must.push(json!({
            "multi_match": {
                "query": q,
                "fields": ["name^2", "description"]
            }
        }));
    }

    if let Some(category) = params.category {
        filter.push(json!({ "term": { "category_ids": category } }));
    }

    if params.price_min.is_some() || params.price_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = params.price_min {
            range.insert("gte".into(), json!(min));
        }
        if let Some(max) = params.price_max {
            range.insert("lte".into(), json!(max));
        }
        filter.push(json!({ "range": { "price": Value::Object(range) } }));
    }

    let query = if must.is_empty() && filter.is_empty() {
        json!({ "match_all": {} })
    } else {
        let mut bool_clause = serde_json::Map::new();
        if !must.is_empty() {
            bool_clause.insert("must".into(), Value::Array(must));
        }
        if !filter.is_empty() {
            bool_clause.insert("filter".into(), Value::Array(filter));
        }
        json!({ "bool": Value::Object(bool_clause) })
    };

    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let page = params.page.unwrap_or(1).max(1);

    json!({
        "from": (page - 1) * per_page,
        "size": per_page,
        "query": query
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(
        q: Option<&str>,
        category: Option<i32>,
        price_min: Option<f32>,
        price_max: Option<f32>,
    ) -> ProductSearchParams {
        ProductSearchParams {
            q: q.map(str::to_string),
            category,
            price_min,
            price_max,
            page: None,
            per_page: None,
        }
    }

    #[test]
    fn free_text_weights_name_over_description() {
        let body = build_product_query(&params(Some("usb cable"), None, None, None));
        let multi_match = &body["query"]["bool"]["must"][0]["multi_match"];
        assert_eq!(multi_match["query"], "usb cable");
        assert_eq!(multi_match["fields"][0], "name^2");
        assert_eq!(multi_match["fields"][1], "description");
    }

    #[test]
    fn category_becomes_term_filter() {
        let body = build_product_query(&params(None, Some(7), None, None));
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter[0]["term"]["category_ids"], 7);
    }

    #[test]
    fn only_min_bound_yields_gte_without_lte() {
        let body = build_product_query(&params(None, None, Some(5.0), None));
        let range = &body["query"]["bool"]["filter"][0]["range"]["price"];
        assert_eq!(range["gte"], 5.0);
        assert!(range.get("lte").is_none());
    }

    #[test]
    fn only_max_bound_yields_lte_without_gte() {
        let body = build_product_query(&params(None, None, None, Some(25.0)));
        let range = &body["query"]["bool"]["filter"][0]["range"]["price"];
        assert_eq!(range["lte"], 25.0);
        assert!(range.get("gte").is_none());
    }

    #[test]
    fn no_bounds_means_no_range_clause() {
        let body = build_product_query(&params(Some("mug"), Some(3), None, None));
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 1);
        assert!(filter[0].get("range").is_none());
    }

    #[test]
    fn empty_query_falls_back_to_match_all() {
        let body = build_product_query(&params(None, None, None, None));
        assert!(body["query"].get("match_all").is_some());

        let body = build_product_query(&params(Some("   "), None, None, None));
        assert!(body["query"].get("match_all").is_some());
    }

    #[test]
    fn paging_is_offset_based() {
        let mut p = params(None, None, None, None);
        p.page = Some(3);
        p.per_page = Some(10);
        let body = build_product_query(&p);
        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 10);
    }

    #[test]
    fn per_page_is_clamped() {
        let mut p = params(None, None, None, None);
        p.per_page = Some(10_000);
        assert_eq!(build_product_query(&p)["size"], MAX_PER_PAGE);

        p.per_page = Some(0);
        assert_eq!(build_product_query(&p)["size"], 1);
    }
}
