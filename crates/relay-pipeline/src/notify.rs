//! Airflow orchestrator notifier.
//!
//! Triggers a DAG run after a file lands in object storage. Routing is
//! configuration-driven: a small set of product names goes to the "middle"
//! Airflow deployment using a fetched bearer token; everything else goes to
//! the default deployment with basic auth. No internal retry; a rejected
//! trigger feeds the engine's retry state machine.

use std::collections::HashSet;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Product names routed to the middle deployment by default.
///
/// Mirrors the upstream allow list; override via [`NotifierConfig`].
pub const DEFAULT_MIDDLE_PRODUCTS: &[&str] = &[
    "Relatório de Acompanhamento Hidrológico",
    "Modelo GEFS",
    "Resultados preliminares não consistidos  (vazões semanais - PMO)",
    "Relatório dos resultados finais consistidos da previsão diária (PDP)",
    "Preliminar - Relatório Mensal de Limites de Intercâmbio",
    "Relatório Mensal de Limites de Intercâmbio para o Modelo DECOMP",
    "Carga por patamar - DECOMP",
    "Deck NEWAVE Preliminar",
    "DECK NEWAVE DEFINITIVO",
    "Previsões de carga mensal e por patamar - NEWAVE",
    "Modelo ETA",
    "Modelo ECMWF",
    "IPDO (Informativo Preliminar Diário da Operação)",
    "Deck Preliminar DECOMP - Valor Esperado",
];

/// How a route authenticates against its Airflow deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AirflowAuth {
    /// HTTP basic auth.
    Basic {
        /// Airflow username
        username: String,
        /// Airflow password
        password: String,
    },
    /// Bearer token fetched from a login endpoint before each trigger.
    BearerLogin {
        /// Login endpoint returning `{ "access_token": ... }`
        auth_url: String,
        /// Login username
        username: String,
        /// Login password
        password: String,
    },
}

/// One Airflow deployment a trigger can be routed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirflowRoute {
    /// API base URL, e.g. `https://airflow.example/api/v1`.
    pub base_url: String,
    /// DAG triggered for webhook files.
    pub dag_id: String,
    /// Authentication scheme for this deployment.
    pub auth: AirflowAuth,
}

/// Routing configuration: a default route plus an optional middle route
/// keyed by product name.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Route used when no other rule matches.
    pub default_route: AirflowRoute,
    /// Route for allow-listed products, when deployed.
    pub middle_route: Option<AirflowRoute>,
    /// Product names routed to the middle deployment.
    pub middle_products: HashSet<String>,
}

impl NotifierConfig {
    /// Builds a config with the upstream default allow list.
    pub fn new(default_route: AirflowRoute, middle_route: Option<AirflowRoute>) -> Self {
        Self {
            default_route,
            middle_route,
            middle_products: DEFAULT_MIDDLE_PRODUCTS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn route_for(&self, nome: &str) -> &AirflowRoute {
        match &self.middle_route {
            Some(middle) if self.middle_products.contains(nome) => middle,
            _ => &self.default_route,
        }
    }
}

/// DAG run configuration payload, forwarded to Airflow as `conf`.
///
/// Field names are part of the downstream contract; do not rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagRunRequest {
    /// Product date metadata.
    pub data_produto: String,
    /// Macro-process metadata.
    pub macro_processo: String,
    /// Product name.
    pub nome: String,
    /// Reporting-period start, ISO-8601.
    pub periodicidade: String,
    /// Reporting-period end, ISO-8601.
    pub periodicidade_final: String,
    /// Originating process.
    pub processo: String,
    /// Source file URL.
    pub url: String,
    /// Storage key of the uploaded file.
    pub s3_key: String,
    /// Webhook record identifier.
    pub webhook_id: String,
    /// Stored filename (key segment after the webhook id).
    pub filename: String,
}

/// Triggers a downstream orchestrator run for a stored file.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fires a DAG run carrying `run` as configuration, routed by `nome`.
    async fn trigger(&self, run: &DagRunRequest, nome: &str) -> Result<()>;
}

/// HTTP notifier for Airflow's stable REST API.
pub struct AirflowNotifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

impl AirflowNotifier {
    /// Creates a notifier with the given routing configuration.
    pub fn new(config: NotifierConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    async fn auth_header(&self, auth: &AirflowAuth) -> Result<String> {
        match auth {
            AirflowAuth::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Ok(format!("Basic {encoded}"))
            },
            AirflowAuth::BearerLogin { auth_url, username, password } => {
                let response = self
                    .client
                    .post(auth_url)
                    .json(&serde_json::json!({ "username": username, "password": password }))
                    .send()
                    .await
                    .map_err(|e| PipelineError::notify(None, e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(PipelineError::notify(
                        Some(status.as_u16()),
                        format!("orchestrator authentication failed: {body}"),
                    ));
                }

                let login: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::notify(None, e.to_string()))?;
                Ok(format!("Bearer {}", login.access_token))
            },
        }
    }
}

#[async_trait]
impl Notifier for AirflowNotifier {
    async fn trigger(&self, run: &DagRunRequest, nome: &str) -> Result<()> {
        let route = self.config.route_for(nome);
        let url = format!("{}/dags/{}/dagRuns", route.base_url, route.dag_id);
        let dag_run_id = format!("external-api_webhook-{}", Utc::now().to_rfc3339());

        debug!(nome, dag_id = %route.dag_id, dag_run_id = %dag_run_id, "triggering orchestrator run");

        let body = serde_json::json!({
            "conf": run,
            "dag_run_id": dag_run_id,
            "logical_date": Utc::now().to_rfc3339(),
        });

        let auth = self.auth_header(&route.auth).await?;
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::notify(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::notify(Some(status.as_u16()), body));
        }

        info!(nome, dag_id = %route.dag_id, "orchestrator run triggered");
        Ok(())
    }
}
