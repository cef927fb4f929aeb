use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::settle;
use crate::errors::FetchError;
use crate::fetch::{FetchClient, RequestOptions, UploadOptions};
use crate::upload::{FileBlob, ProgressSink};

/// Multipart field the CV endpoint reads the file from.
pub const CV_FIELD_NAME: &str = "cv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub name: String,
    pub score: u32,
    #[serde(default)]
    pub feedback: Vec<String>,
}

/// ATS-compatibility report for an uploaded CV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvAnalysis {
    pub id: String,
    pub ats_score: u32,
    #[serde(default)]
    pub sections: Vec<SectionScore>,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    #[serde(default)]
    pub missing_keywords: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Clone)]
pub struct CvApi {
    client: FetchClient,
}

impl CvApi {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }

    /// POST /cv/upload
    pub async fn upload_resume(
        &self,
        file: FileBlob,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<UploadReceipt, FetchError> {
        let mut options = UploadOptions::default().with_field_name(CV_FIELD_NAME);
        options.progress = progress;

        let response = self.client.upload("/cv/upload", file, options).await?;
        settle(&self.client, response.json(), Some("CV uploaded"))
    }

    /// GET /cv/analysis/{id}
    pub async fn analysis(&self, id: &str) -> Result<CvAnalysis, FetchError> {
        let response = self
            .client
            .get(&format!("/cv/analysis/{id}"), RequestOptions::default())
            .await?;
        settle(&self.client, response.json(), None)
    }

    /// Cancels whichever CV call is in flight. Its caller sees `Cancelled`.
    pub fn cancel(&self) {
        self.client.cancel_request();
    }
}
