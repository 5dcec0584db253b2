//! Authorization gate: a stateless adapter over the external policy
//! decision point.
//!
//! All handlers route their access decisions through this module; nothing
//! else may consult the policy point directly.

use std::collections::HashSet;

use crate::catalog::CatalogStore;
use crate::config::Config;

/// Service names whose `X-Service-Token` headers are accepted as trusted
/// peers of this deployment.
pub const TRUSTED_SERVICES: &[&str] = &["query", "candig-ingest"];

/// The authorization-relevant parts of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Bearer token from the `Authorization` header, if any.
    pub bearer_token: Option<String>,
    /// Value of the `X-Service-Token` header, if any.
    pub service_token: Option<String>,
    /// HTTP method of the request.
    pub method: String,
    /// Path of the request.
    pub path: String,
}

impl RequestContext {
    #[cfg(test)]
    pub fn testing(test_key: &str) -> Self {
        Self {
            bearer_token: Some(test_key.to_string()),
            ..Default::default()
        }
    }
}

/// Client for the OPA-style policy decision point.
#[derive(Debug, Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    url: String,
    secret: String,
    site_admin_key: String,
}

impl PolicyClient {
    pub fn new(url: &str, secret: &str, site_admin_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            site_admin_key: site_admin_key.to_string(),
        }
    }

    async fn post_document(
        &self,
        document: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let response = self
            .http
            .post(format!("{}/v1/data/{}", self.url, document))
            .bearer_auth(&self.secret)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("policy point unreachable: {}", e))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "policy point returned {} for {}",
                response.status(),
                document
            );
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| anyhow::anyhow!("policy point returned invalid JSON: {}", e))
    }

    /// Whether the token may perform `method` on `path` within `program`.
    pub async fn is_action_allowed_for_program(
        &self,
        token: &str,
        method: &str,
        path: &str,
        program: &str,
    ) -> Result<bool, anyhow::Error> {
        let body = self
            .post_document(
                "permissions/allowed",
                serde_json::json!({
                    "token": token,
                    "body": { "path": path, "method": method },
                    "program": program,
                }),
            )
            .await?;
        Ok(body
            .get("result")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// The cohorts the token may see for `method` on `path`.
    pub async fn get_opa_datasets(
        &self,
        token: &str,
        method: &str,
        path: &str,
    ) -> Result<Vec<String>, anyhow::Error> {
        let body = self
            .post_document(
                "permissions/datasets",
                serde_json::json!({
                    "token": token,
                    "body": { "path": path, "method": method },
                }),
            )
            .await?;
        let result = body
            .get("result")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(result
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect())
    }

    /// Whether the token belongs to a site admin.
    pub async fn is_site_admin(&self, token: &str) -> Result<bool, anyhow::Error> {
        let body = self
            .post_document(
                &format!("idp/{}", self.site_admin_key),
                serde_json::json!({ "token": token }),
            )
            .await?;
        Ok(body.get("result").is_some())
    }

    /// Whether `token` is the registered service token for `service`.
    pub async fn verify_service_token(
        &self,
        service: &str,
        token: &str,
    ) -> Result<bool, anyhow::Error> {
        let body = self
            .post_document(
                "service/verified",
                serde_json::json!({ "service": service, "token": token }),
            )
            .await?;
        Ok(body
            .get("result")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

/// The authorization gate consulted by every handler.
#[derive(Debug, Clone)]
pub struct AuthzGate {
    store: CatalogStore,
    policy: Option<PolicyClient>,
    test_key: String,
}

impl AuthzGate {
    pub fn new(store: CatalogStore, config: &Config) -> Self {
        let policy = config
            .opa_url
            .as_ref()
            .map(|url| PolicyClient::new(url, &config.opa_secret, &config.site_admin_key));
        Self {
            store,
            policy,
            test_key: config.test_key.clone(),
        }
    }

    /// True iff the request carries the configured shared-secret bearer
    /// token; all other checks short-circuit allow when this holds.
    pub fn is_testing(&self, ctx: &RequestContext) -> bool {
        ctx.bearer_token.as_deref() == Some(self.test_key.as_str())
    }

    /// True iff the request bears a service token registered for one of the
    /// trusted peer services.
    pub async fn is_trusted_service(&self, ctx: &RequestContext) -> bool {
        let Some(token) = &ctx.service_token else {
            return false;
        };
        let Some(policy) = &self.policy else {
            return false;
        };
        for service in TRUSTED_SERVICES {
            match policy.verify_service_token(service, token).await {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!("could not verify service token: {}", e);
                    return false;
                }
            }
        }
        false
    }

    /// Authorize access to a DRS object via its cohort.
    ///
    /// Returns an HTTP-style status: 200 allowed, 401 no credentials, 403
    /// denied, 404 object (or its cohort attribute) missing.
    pub async fn is_authed(&self, object_id: &str, ctx: &RequestContext) -> u16 {
        let Some(_policy) = &self.policy else {
            tracing::warn!("WARNING: AUTHORIZATION IS DISABLED");
            return 200;
        };
        if self.is_testing(ctx) {
            tracing::warn!("WARNING: TEST MODE, AUTHORIZATION IS DISABLED");
            return 200;
        }
        if self.is_trusted_service(ctx).await {
            return 200;
        }
        if ctx.bearer_token.is_none() {
            return 401;
        }
        let obj = match self.store.get_drs_object(object_id).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return 404,
            Err(e) => {
                tracing::warn!("could not resolve object {} for authz: {}", object_id, e);
                return 500;
            }
        };
        let Some(cohort) = &obj.cohort else {
            return 404;
        };
        if self.is_cohort_authorized(ctx, cohort).await {
            200
        } else {
            403
        }
    }

    /// Whether the request's token is allowed to act on the given cohort
    /// (called "program" by the policy point).
    pub async fn is_cohort_authorized(&self, ctx: &RequestContext, cohort_id: &str) -> bool {
        let Some(policy) = &self.policy else {
            return true;
        };
        if self.is_testing(ctx) {
            return true;
        }
        let Some(token) = &ctx.bearer_token else {
            return false;
        };
        policy
            .is_action_allowed_for_program(token, &ctx.method, &ctx.path, cohort_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("policy check failed for cohort {}: {}", cohort_id, e);
                false
            })
    }

    /// Whether the requester is a site admin.
    pub async fn is_site_admin(&self, ctx: &RequestContext) -> bool {
        let Some(policy) = &self.policy else {
            tracing::warn!("WARNING: AUTHORIZATION IS DISABLED");
            return true;
        };
        if self.is_testing(ctx) {
            tracing::warn!("WARNING: TEST MODE, AUTHORIZATION IS DISABLED");
            return true;
        }
        let Some(token) = &ctx.bearer_token else {
            return false;
        };
        policy.is_site_admin(token).await.unwrap_or_else(|e| {
            tracing::warn!("site admin check failed: {}", e);
            false
        })
    }

    /// The set of cohorts the requester may see; failures yield the empty
    /// set.
    pub async fn get_authorized_cohorts(&self, ctx: &RequestContext) -> HashSet<String> {
        let Some(policy) = &self.policy else {
            // Authorization disabled: everything is visible.
            return match self.store.list_cohorts().await {
                Ok(cohorts) => cohorts.into_iter().collect(),
                Err(_) => HashSet::new(),
            };
        };
        if self.is_testing(ctx) {
            return match self.store.list_cohorts().await {
                Ok(cohorts) => cohorts.into_iter().collect(),
                Err(_) => HashSet::new(),
            };
        }
        let Some(token) = &ctx.bearer_token else {
            return HashSet::new();
        };
        match policy.get_opa_datasets(token, &ctx.method, &ctx.path).await {
            Ok(datasets) => datasets.into_iter().collect(),
            Err(e) => {
                tracing::warn!("could not list authorized cohorts: {}", e);
                HashSet::new()
            }
        }
    }
}
