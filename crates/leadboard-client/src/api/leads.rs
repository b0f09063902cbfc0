use std::sync::Arc;

use reqwest::Method;
use reqwest::multipart::{Form, Part};

use crate::error::{ClientError, Result};
use crate::http::HttpClient;
use crate::query::{EntityKind, Fetched, QueryCache, QueryKey};
use crate::types::{
    ActionResponse, BulkDeleteRequest, BulkDeleteResponse, GeoStat, GeoStatsResponse,
    ImportSummary, Lead, LeadFilters, LeadInput, Page, RemoveDuplicatesResponse,
};

use super::paging;

/// Spreadsheet handed to [`LeadsApi::import`].
#[derive(Debug, Clone)]
pub struct ImportFile {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl ImportFile {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
        }
    }

    fn mime(&self) -> &'static str {
        let lower = self.filename.to_lowercase();
        if lower.ends_with(".csv") {
            "text/csv"
        } else if lower.ends_with(".xlsx") {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        } else if lower.ends_with(".xls") {
            "application/vnd.ms-excel"
        } else {
            "application/octet-stream"
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeadsApi {
    http: HttpClient,
    cache: QueryCache,
}

impl LeadsApi {
    pub fn new(http: HttpClient, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn list_key(filters: &LeadFilters, page: u32, page_size: u32) -> QueryKey {
        QueryKey::new(EntityKind::Leads, "list")
            .params(filters.to_query())
            .params(paging(page, page_size))
    }

    pub fn detail_key(id: i64) -> QueryKey {
        QueryKey::new(EntityKind::Leads, "detail").param("id", id)
    }

    pub async fn list(
        &self,
        filters: &LeadFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Arc<Page<Lead>>> {
        let mut query = filters.to_query();
        query.extend(paging(page, page_size));
        let http = self.http.clone();
        self.cache
            .fetch(Self::list_key(filters, page, page_size), move || async move {
                http.get_json::<Page<Lead>>("leads", &query).await
            })
            .await
    }

    /// `None` means no lead is selected; nothing is requested.
    pub async fn get(&self, id: Option<i64>) -> Result<Fetched<Lead>> {
        let Some(id) = id else {
            return Ok(Fetched::Disabled);
        };
        let http = self.http.clone();
        let result = self
            .cache
            .fetch(Self::detail_key(id), move || async move {
                http.get_json::<Lead>(&format!("leads/{id}"), &[]).await
            })
            .await;
        Fetched::from_result(result)
    }

    pub async fn create(&self, input: &LeadInput) -> Result<Lead> {
        self.cache
            .mutate(&[EntityKind::Leads], self.http.post_json("leads", input))
            .await
    }

    pub async fn update(&self, id: i64, input: &LeadInput) -> Result<Lead> {
        let path = format!("leads/{id}");
        self.cache
            .mutate(&[EntityKind::Leads], self.http.patch_json(&path, input))
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<ActionResponse> {
        let path = format!("leads/{id}");
        self.cache
            .mutate(&[EntityKind::Leads], self.http.delete_action(&path))
            .await
    }

    pub async fn bulk_delete(&self, ids: &[i64]) -> Result<BulkDeleteResponse> {
        if ids.is_empty() {
            return Ok(BulkDeleteResponse::default());
        }
        let body = BulkDeleteRequest { ids };
        self.cache
            .mutate(
                &[EntityKind::Leads],
                self.http.post_json("leads/bulk-delete", &body),
            )
            .await
    }

    /// Upload a CSV or Excel file. Uses the longer import timeout.
    pub async fn import(&self, file: &ImportFile) -> Result<ImportSummary> {
        if file.bytes.is_empty() {
            return Err(ClientError::Api {
                status: 400,
                message: "Import file is empty".to_string(),
            });
        }
        let timeout = self.http.import_timeout();
        let write = async {
            let response = self
                .http
                .send(Method::POST, "leads/import", |req| {
                    let part = Part::bytes(file.bytes.clone())
                        .file_name(file.filename.clone())
                        .mime_str(file.mime())
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                    Ok(req.multipart(Form::new().part("file", part)).timeout(timeout))
                })
                .await?;
            HttpClient::read_json::<ImportSummary>(response).await
        };
        let summary = self.cache.mutate(&[EntityKind::Leads], write).await?;
        tracing::info!(
            filename = %file.filename,
            imported = summary.imported,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            "lead import finished"
        );
        Ok(summary)
    }

    pub async fn remove_duplicates(&self) -> Result<RemoveDuplicatesResponse> {
        let write = async {
            let response = self
                .http
                .send(Method::POST, "leads/remove-duplicates", Ok)
                .await?;
            HttpClient::read_json_or_default::<RemoveDuplicatesResponse>(response).await
        };
        self.cache.mutate(&[EntityKind::Leads], write).await
    }

    pub async fn geographic_stats(&self) -> Result<Arc<Vec<GeoStat>>> {
        let http = self.http.clone();
        self.cache
            .fetch(
                QueryKey::new(EntityKind::Leads, "geographic-stats"),
                move || async move {
                    let stats: GeoStatsResponse =
                        http.get_json("leads/geographic-stats", &[]).await?;
                    Ok::<_, ClientError>(stats.into_stats())
                },
            )
            .await
    }
}
