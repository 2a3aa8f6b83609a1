use crate::error::{ApiError, ApiResult};
use crate::models::{Note, NoteId, NoteKey, SavedNote, Timestamp};
use crate::storage::load_token_from_storage;
use crate::store::NoteStore;
use crate::util::parse_server_timestamp_ms;
use serde::{Deserialize, Serialize};

const NOTES_PATH: &str = "/rest/v1/lesson_notes";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EnvConfig {
    pub api_url: String,
    pub api_key: Option<String>,
}

impl EnvConfig {
    pub fn new() -> Self {
        let default_api_url = "http://localhost:54321".to_string();

        let env = web_sys::window()
            .and_then(|w| w.get("ENV"))
            .filter(|env| !env.is_undefined() && env.is_object());

        // `window.ENV.API_URL` is the documented form; `api_url` is accepted too.
        let read = |names: &[&str]| -> Option<String> {
            let env = env.as_ref()?;
            names.iter().find_map(|name| {
                js_sys::Reflect::get(env, &(*name).into())
                    .ok()
                    .and_then(|v| v.as_string())
            })
        };

        Self {
            api_url: read(&["API_URL", "api_url"]).unwrap_or(default_api_url),
            api_key: read(&["API_KEY", "api_key"]),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Server timestamps arrive either as epoch millis or as ISO strings depending on the column type.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub(crate) enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    fn to_timestamp(&self) -> ApiResult<Timestamp> {
        match self {
            WireTimestamp::Millis(ms) => Ok(Timestamp(*ms)),
            WireTimestamp::Text(s) => parse_server_timestamp_ms(s)
                .map(Timestamp)
                .ok_or_else(|| ApiError::parse(format!("bad updated_at: {s}"))),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub(crate) struct NoteRow {
    pub id: String,
    pub user_id: String,
    pub lesson_id: String,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub updated_at: WireTimestamp,
}

impl NoteRow {
    pub(crate) fn into_note(self) -> ApiResult<Note> {
        if self.id.trim().is_empty() {
            return Err(ApiError::parse("note row is missing id"));
        }
        Ok(Note {
            updated_at: self.updated_at.to_timestamp()?,
            id: NoteId(self.id),
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            course_id: self.course_id.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
        })
    }
}

#[derive(Serialize, Clone, Debug)]
pub(crate) struct CreateNoteRequest<'a> {
    pub user_id: &'a str,
    pub lesson_id: &'a str,
    pub course_id: &'a str,
    pub content: &'a str,
}

#[derive(Serialize, Clone, Debug)]
pub(crate) struct UpdateNoteRequest<'a> {
    pub content: &'a str,
}

/// REST client for the hosted lesson-notes table.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            api_key: None,
            token: None,
        }
    }

    pub fn load_from_storage() -> Self {
        let env = EnvConfig::new();
        Self {
            base_url: env.api_url,
            api_key: env.api_key,
            token: load_token_from_storage(),
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn auth_header(&self) -> Option<String> {
        self.token
            .as_ref()
            .or(self.api_key.as_ref())
            .map(|t| format!("Bearer {t}"))
    }

    pub(crate) fn notes_url(&self, filters: &[(&str, &str)]) -> String {
        let query: Vec<String> = filters
            .iter()
            .map(|(col, v)| format!("{col}=eq.{}", urlencoding::encode(v)))
            .collect();
        if query.is_empty() {
            format!("{}{NOTES_PATH}", self.base_url)
        } else {
            format!("{}{NOTES_PATH}?{}", self.base_url, query.join("&"))
        }
    }

    fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", auth);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, ctx: &str) -> ApiResult<reqwest::Response> {
        let res = self.with_headers(req).send().await.map_err(ApiError::network)?;
        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else if status.as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status.as_u16(), body, ctx))
        }
    }

    async fn rows(&self, req: reqwest::RequestBuilder, ctx: &str) -> ApiResult<Vec<Note>> {
        let rows: Vec<NoteRow> = self
            .send(req, ctx)
            .await?
            .json()
            .await
            .map_err(ApiError::parse)?;
        rows.into_iter().map(NoteRow::into_note).collect()
    }

    fn saved(notes: Vec<Note>, ctx: &str) -> ApiResult<SavedNote> {
        notes
            .into_iter()
            .next()
            .map(|n| SavedNote {
                id: n.id,
                updated_at: n.updated_at,
            })
            .ok_or_else(|| ApiError::not_found(ctx))
    }
}

impl NoteStore for ApiClient {
    async fn load_note(&self, key: &NoteKey) -> ApiResult<Option<Note>> {
        let url = self.notes_url(&[
            ("user_id", key.user_id.as_str()),
            ("lesson_id", key.lesson_id.as_str()),
        ]);
        let req = reqwest::Client::new().get(url).query(&[("select", "*")]);
        let notes = self.rows(req, "Load note failed").await?;
        Ok(notes.into_iter().next())
    }

    async fn create_note(
        &self,
        key: &NoteKey,
        course_id: &str,
        content: &str,
    ) -> ApiResult<SavedNote> {
        // Upsert on the (user_id, lesson_id) unique key so a racing create never duplicates.
        let url = format!("{}?on_conflict=user_id,lesson_id", self.notes_url(&[]));
        let req = reqwest::Client::new()
            .post(url)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&CreateNoteRequest {
                user_id: &key.user_id,
                lesson_id: &key.lesson_id,
                course_id,
                content,
            });
        let notes = self.rows(req, "Create note failed").await?;
        Self::saved(notes, "created note")
    }

    async fn update_note(&self, id: &NoteId, content: &str) -> ApiResult<SavedNote> {
        let url = self.notes_url(&[("id", id.as_str())]);
        let req = reqwest::Client::new()
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&UpdateNoteRequest { content });
        let notes = self.rows(req, "Update note failed").await?;
        Self::saved(notes, format!("note {id}").as_str())
    }

    async fn delete_note(&self, id: &NoteId) -> ApiResult<()> {
        let url = self.notes_url(&[("id", id.as_str())]);
        self.send(reqwest::Client::new().delete(url), "Delete note failed")
            .await?;
        Ok(())
    }
}
