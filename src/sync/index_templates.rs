use super::{
    ReconcileReport, Syncer,
    diff::{ReplaceMode, SemanticEq, list_eq, list_eq_by},
};
use crate::{
    constants::ROUTER_LOGS_TEMPLATE,
    error::SyncError,
    models::{
        DynamicTemplate, IndexTemplate, IndexTemplateDefinition, Mapping, Mappings, Template,
    },
};
use std::collections::BTreeMap;

fn dynamic_template_eq(a: &DynamicTemplate, b: &DynamicTemplate) -> bool {
    a.match_pattern == b.match_pattern
        && a.match_mapping_type == b.match_mapping_type
        && a.match_field == b.match_field
        && a.mapping.mapping_type == b.mapping.mapping_type
        && a.mapping.ignore_malformed == b.mapping.ignore_malformed
}

fn dynamic_templates_entry_eq(
    a: &BTreeMap<String, DynamicTemplate>,
    b: &BTreeMap<String, DynamicTemplate>,
) -> bool {
    a.len() == b.len()
        && a.iter().all(|(name, template)| {
            b.get(name)
                .is_some_and(|other| dynamic_template_eq(template, other))
        })
}

fn mappings_eq(a: Option<&Mappings>, b: Option<&Mappings>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => list_eq_by(
            &a.dynamic_templates,
            &b.dynamic_templates,
            dynamic_templates_entry_eq,
        ),
        _ => false,
    }
}

impl SemanticEq for IndexTemplate {
    fn semantic_eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.index_template, &other.index_template);
        list_eq(&a.composed_of, &b.composed_of)
            && list_eq(&a.index_patterns, &b.index_patterns)
            && mappings_eq(a.template.mappings.as_ref(), b.template.mappings.as_ref())
    }
}

fn ip_field(field: &str) -> BTreeMap<String, DynamicTemplate> {
    BTreeMap::from([(
        field.to_string(),
        DynamicTemplate {
            match_pattern: None,
            match_mapping_type: Some("string".to_string()),
            match_field: Some(field.to_string()),
            mapping: Mapping {
                mapping_type: "ip".to_string(),
                ignore_malformed: true,
            },
        },
    )])
}

/// Index templates required regardless of Lagoon state.
pub fn generate_index_templates() -> BTreeMap<String, IndexTemplate> {
    BTreeMap::from([(
        ROUTER_LOGS_TEMPLATE.to_string(),
        IndexTemplate {
            name: ROUTER_LOGS_TEMPLATE.to_string(),
            index_template: IndexTemplateDefinition {
                composed_of: Vec::new(),
                index_patterns: vec!["router-logs-*".to_string()],
                template: Template {
                    mappings: Some(Mappings {
                        dynamic_templates: vec![ip_field("remote_addr"), ip_field("true-client-ip")],
                    }),
                },
            },
        },
    )])
}

impl Syncer {
    pub(super) async fn sync_index_templates(&self) -> Result<ReconcileReport, SyncError> {
        let existing = self.guard(self.opensearch.index_templates()).await?;
        let required = generate_index_templates();
        self.reconcile(&existing, &required, ReplaceMode::DeleteThenCreate)
            .await
    }
}
