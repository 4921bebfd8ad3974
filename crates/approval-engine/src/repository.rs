//! Storage seams for templates and approval requests

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::request::{ApprovalRequest, ApprovalStatus};
use crate::template::WorkflowTemplate;
use crate::{Result, WorkflowError};

/// Template storage. Templates are write-once; revisions are stored under new ids.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn insert(&self, template: &WorkflowTemplate) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<WorkflowTemplate>>;
    async fn list(&self) -> Result<Vec<WorkflowTemplate>>;
    async fn list_by_document_type(&self, document_type: &str) -> Result<Vec<WorkflowTemplate>>;
}

/// Approval request storage
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn create(&self, request: &ApprovalRequest) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ApprovalRequest>>;
    async fn find_by_document(&self, document_id: &str) -> Result<Vec<ApprovalRequest>>;
    /// In-flight requests whose open stage holds a pending slot for `user_id`
    async fn find_pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalRequest>>;
    async fn find_in_progress(&self) -> Result<Vec<ApprovalRequest>>;
    /// Store `request` if the stored copy is still at `expected_version`
    async fn save(&self, request: &ApprovalRequest, expected_version: u64) -> Result<()>;
}

/// In-memory template repository
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn insert(&self, template: &WorkflowTemplate) -> Result<()> {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&template.id) {
            return Err(WorkflowError::InvalidTemplate(format!(
                "Template {} already exists",
                template.id
            )));
        }
        templates.insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        let mut all: Vec<WorkflowTemplate> = templates.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.version.cmp(&b.version)));
        Ok(all)
    }

    async fn list_by_document_type(&self, document_type: &str) -> Result<Vec<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates
            .values()
            .filter(|t| t.document_type == document_type)
            .cloned()
            .collect())
    }
}

/// In-memory request repository with a version check on save
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRequestRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn by_creation(mut requests: Vec<ApprovalRequest>) -> Vec<ApprovalRequest> {
    requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    requests
}

#[async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn create(&self, request: &ApprovalRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(WorkflowError::Repository(format!(
                "Approval request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(id).cloned())
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(by_creation(
            requests
                .values()
                .filter(|r| r.document.id == document_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(by_creation(
            requests
                .values()
                .filter(|r| r.status == ApprovalStatus::InProgress)
                .filter(|r| {
                    r.current_stage()
                        .map(|s| s.pending_actions().any(|a| a.user_id == user_id))
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn find_in_progress(&self) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(by_creation(
            requests
                .values()
                .filter(|r| r.status == ApprovalStatus::InProgress)
                .cloned()
                .collect(),
        ))
    }

    async fn save(&self, request: &ApprovalRequest, expected_version: u64) -> Result<()> {
        let mut requests = self.requests.write().await;
        let stored = requests
            .get(&request.id)
            .ok_or_else(|| WorkflowError::RequestNotFound(request.id.clone()))?;

        if stored.version != expected_version {
            return Err(WorkflowError::ConcurrentModification(request.id.clone()));
        }

        requests.insert(request.id.clone(), request.clone());
        Ok(())
    }
}
