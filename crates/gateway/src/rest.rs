//! HTTP gateway for a PostgREST-style data API with password auth and a
//! websocket change feed.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{
    domain::{MessageId, UserId},
    error::ApiError,
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::{
    realtime::{self, ChannelJoin},
    Filter, Gateway, GatewayError, Query, Result, Session, Subscription, Table,
};

const APPEND_READER_RPC: &str = "rest/v1/rpc/append_message_reader";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

pub struct RestGateway {
    http: Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
}

impl RestGateway {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(&format!("{trimmed}/"))?;
        Ok(Self {
            http: Client::new(),
            base_url,
            anon_key: anon_key.into(),
            session: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn table_url(&self, table: Table) -> Result<Url> {
        self.endpoint(&format!("rest/v1/{}", table.as_str()))
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|session| session.access_token.clone())
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn send(&self, table: Table, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).await.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            table,
            source: ApiError::from_response(status.as_u16(), &body),
        })
    }

    /// Websocket endpoint of the change feed, derived from the base url.
    pub fn realtime_url(&self) -> Result<String> {
        let http_url = self.endpoint("realtime/v1/websocket")?;
        let raw = http_url.as_str();
        let ws_url = if raw.starts_with("https://") {
            raw.replacen("https://", "wss://", 1)
        } else if raw.starts_with("http://") {
            raw.replacen("http://", "ws://", 1)
        } else {
            return Err(GatewayError::Unsupported(format!(
                "backend url must start with http:// or https://, got {raw}"
            )));
        };
        Ok(format!("{ws_url}?apikey={}&vsn=1.0.0", self.anon_key))
    }
}

fn encode_filter_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

fn quote_list_item(value: &Value) -> String {
    match value {
        Value::String(text) => format!("\"{}\"", text.replace('"', "\\\"")),
        other => encode_filter_value(other),
    }
}

pub(crate) fn filter_param(filter: &Filter) -> (String, String) {
    let operand = match filter {
        Filter::Eq(_, value) => format!("eq.{}", encode_filter_value(value)),
        Filter::Neq(_, value) => format!("neq.{}", encode_filter_value(value)),
        Filter::Lt(_, value) => format!("lt.{}", encode_filter_value(value)),
        Filter::In(_, values) => {
            let items: Vec<String> = values.iter().map(quote_list_item).collect();
            format!("in.({})", items.join(","))
        }
    };
    (filter.column().to_owned(), operand)
}

pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_owned(), "*".to_owned())];
    params.extend(query.filters.iter().map(filter_param));
    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|key| {
                let direction = if key.ascending { "asc" } else { "desc" };
                format!("{}.{direction}", key.column)
            })
            .collect();
        params.push(("order".to_owned(), order.join(",")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_owned(), limit.to_string()));
    }
    params
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(filter_param).collect()
}

#[async_trait]
impl Gateway for RestGateway {
    async fn query(&self, query: Query) -> Result<Vec<Value>> {
        let table = query.table;
        let request = self
            .http
            .get(self.table_url(table)?)
            .query(&query_params(&query));
        let rows: Vec<Value> = self.send(table, request).await?.json().await?;
        debug!(%table, rows = rows.len(), "query completed");
        Ok(rows)
    }

    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        let request = self
            .http
            .post(self.table_url(table)?)
            .header("Prefer", "return=representation")
            .json(&record);
        let rows: Vec<Value> = self.send(table, request).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or(GatewayError::NotFound { table })
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> Result<()> {
        let request = self
            .http
            .patch(self.table_url(table)?)
            .query(&filter_params(&filters))
            .json(&patch);
        self.send(table, request).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<()> {
        let request = self
            .http
            .delete(self.table_url(table)?)
            .query(&filter_params(&filters));
        self.send(table, request).await?;
        Ok(())
    }

    async fn append_reader(&self, message_id: MessageId, reader: UserId) -> Result<()> {
        let request = self
            .http
            .post(self.endpoint(APPEND_READER_RPC)?)
            .json(&json!({ "message_id": message_id, "reader_id": reader }));
        self.send(Table::Messages, request).await?;
        Ok(())
    }

    async fn subscribe(&self, table: Table, filter: Option<Filter>) -> Result<Subscription> {
        let filter = filter
            .map(|filter| match &filter {
                Filter::Eq(column, value) => {
                    Ok(format!("{column}=eq.{}", encode_filter_value(value)))
                }
                other => Err(GatewayError::Unsupported(format!(
                    "change feed only filters by equality, got {other:?}"
                ))),
            })
            .transpose()?;
        let join = ChannelJoin {
            topic: format!("realtime:{}", table.as_str()),
            table,
            filter,
            access_token: self.access_token().await,
        };
        realtime::subscribe(self.realtime_url()?, join).await
    }

    async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(
                ApiError::from_response(status.as_u16(), &body).message,
            ));
        }
        let token: TokenResponse = response.json().await?;
        let session = Session {
            user_id: token.user.id,
            email: token.user.email.unwrap_or_else(|| email.to_owned()),
            access_token: Some(token.access_token),
        };
        *self.session.write().await = Some(session.clone());
        info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(token) = self.access_token().await else {
            return Ok(());
        };
        let result = self
            .http
            .post(self.endpoint("auth/v1/logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await;
        // The local session ends even if the server could not be told.
        *self.session.write().await = None;
        result?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
