use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub subject: String,
    pub html_content: String,
    pub variables: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of template create/update calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateInput {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub subject: String,
    pub html_content: String,

    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}
