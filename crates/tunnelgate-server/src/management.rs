use std::sync::Arc;

use serde_json::json;
use tunnelgate_core::id;
use tunnelgate_core::registry::{ClientRegistry, CreateOptions};

use crate::error::DispatchError;
use crate::response::HttpResponse;

/// `GET /?new` and `GET /:id` both funnel here; `requested_id` is `None`
/// for the former. Mirrors spec §6's combined behavior: create, then
/// respond with the same JSON shape either way.
pub async fn create_tunnel(
    registry: &Arc<ClientRegistry>,
    requested_id: Option<String>,
    host_header: &str,
    scheme: &str,
) -> HttpResponse {
    match registry.create(requested_id, CreateOptions::default()).await {
        Ok(result) => {
            let url = format!("{scheme}://{}.{}", result.id, host_header);
            HttpResponse::json(
                200,
                "OK",
                &json!({
                    "id": result.id,
                    "port": result.port,
                    "max_conn_count": result.max_conn_count,
                    "url": url,
                }),
            )
        }
        Err(e) => HttpResponse::json(
            500,
            "Internal Server Error",
            &json!({ "message": e.to_string() }),
        ),
    }
}

/// Validates a path-derived subdomain id against `^[a-z0-9]{4,63}$`,
/// returning the 403 disposition spec §6 and §7 (`ManagementValidation`)
/// specify on failure.
pub fn validate_requested_id(candidate: &str) -> Result<(), HttpResponse> {
    if id::validate(candidate).is_err() {
        tracing::debug!(
            error = %DispatchError::ManagementValidation(candidate.to_string()),
            "rejecting requested subdomain"
        );
        return Err(HttpResponse::json(
            403,
            "Forbidden",
            &json!({
                "message": "Invalid subdomain. Subdomains must be lowercase and between 4 and 63 alphanumeric characters."
            }),
        ));
    }
    Ok(())
}

pub fn status(registry: &ClientRegistry) -> HttpResponse {
    let stats = registry.stats();
    HttpResponse::json(
        200,
        "OK",
        &json!({ "tunnels": stats.tunnels_count, "mem": {} }),
    )
}

pub fn redirect_to_marketing(marketing_url: &str) -> HttpResponse {
    HttpResponse::redirect(marketing_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_uppercase_and_short_ids() {
        assert!(validate_requested_id("ABCD").is_err());
        assert!(validate_requested_id("abc").is_err());
        assert!(validate_requested_id("abcd").is_ok());
    }

    #[tokio::test]
    async fn create_tunnel_returns_generated_id_and_url() {
        let registry = ClientRegistry::new(10);
        let resp = create_tunnel(&registry, None, "example.com", "http").await;
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        let id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["max_conn_count"], 10);
        assert_eq!(body["url"], format!("http://{id}.example.com"));
    }
}
