//! Template registry: validated, immutable, versioned workflow templates
//!
//! A registered template is never modified. Revising one stores a new template
//! with a fresh id under the same family, so requests created from an earlier
//! revision keep resolving exactly the definition they started with.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::repository::TemplateRepository;
use crate::template::{generate_template_id, WorkflowTemplate};
use crate::{Result, WorkflowError};

pub struct TemplateRegistry {
    repository: Arc<dyn TemplateRepository>,
}

impl TemplateRegistry {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        Self { repository }
    }

    /// Validate and store a new template family at version 1
    pub async fn register(&self, mut template: WorkflowTemplate) -> Result<WorkflowTemplate> {
        template.validate()?;

        if template.id.trim().is_empty() {
            template.id = generate_template_id();
        }
        template.family = template.id.clone();
        template.version = 1;

        self.repository.insert(&template).await?;

        info!(
            template_id = %template.id,
            document_type = %template.document_type,
            stages = template.stages.len(),
            "Workflow template registered"
        );

        Ok(template)
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowTemplate> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.to_string()))
    }

    /// Store `revision` as the next version of the family `id` belongs to.
    ///
    /// Only the latest revision of a family may be revised.
    pub async fn revise(&self, id: &str, mut revision: WorkflowTemplate) -> Result<WorkflowTemplate> {
        let current = self.get(id).await?;
        let latest_version = self
            .versions(&current.family)
            .await?
            .last()
            .map(|t| t.version)
            .unwrap_or(current.version);

        if latest_version != current.version {
            return Err(WorkflowError::InvalidTemplate(format!(
                "Template {} is version {} but the family is at version {}",
                id, current.version, latest_version
            )));
        }

        revision.validate()?;
        revision.id = generate_template_id();
        revision.family = current.family.clone();
        revision.version = current.version + 1;
        revision.created_at = Utc::now();

        self.repository.insert(&revision).await?;

        info!(
            template_id = %revision.id,
            previous_id = %current.id,
            family = %revision.family,
            version = revision.version,
            "Workflow template revised"
        );

        Ok(revision)
    }

    /// All revisions of a family, oldest first
    pub async fn versions(&self, family: &str) -> Result<Vec<WorkflowTemplate>> {
        let mut versions: Vec<WorkflowTemplate> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|t| t.family == family)
            .collect();
        versions.sort_by_key(|t| t.version);
        Ok(versions)
    }

    /// Newest revision registered for a document type
    pub async fn latest_for_document_type(&self, document_type: &str) -> Result<Option<WorkflowTemplate>> {
        let candidates = self.repository.list_by_document_type(document_type).await?;
        Ok(candidates
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.version.cmp(&b.version))))
    }

    pub async fn list(&self) -> Result<Vec<WorkflowTemplate>> {
        self.repository.list().await
    }
}
