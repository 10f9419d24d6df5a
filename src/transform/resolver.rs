//! Transform stage that validates rows and resolves their MX records.

use crate::domain::{outcome, Domain, RawRecord};
use crate::pipeline::OutcomeStats;
use crate::transform::{LookupFactory, MxLookup};
use crate::worker::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves domains against one upstream nameserver.
///
/// Rows that fail validation are dropped and counted as
/// [`outcome::INVALID`]. Lookup failures are not errors: they become the
/// domain's outcome label and the domain is forwarded like a success.
pub struct DomainResolver {
    target: String,
    factory: Arc<dyn LookupFactory>,
    lookup: Option<Arc<dyn MxLookup>>,
    outcomes: Arc<OutcomeStats>,
}

impl DomainResolver {
    pub fn new(
        target: impl Into<String>,
        factory: Arc<dyn LookupFactory>,
        outcomes: Arc<OutcomeStats>,
    ) -> Self {
        Self {
            target: target.into(),
            factory,
            lookup: None,
            outcomes,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Stage for DomainResolver {
    type Input = RawRecord;
    type Output = Domain;

    fn name(&self) -> &str {
        "DomainResolver"
    }

    fn entity(&self) -> String {
        self.target.clone()
    }

    fn item_unit(&self) -> &str {
        "domains"
    }

    async fn setup(&mut self) -> anyhow::Result<()> {
        self.lookup = Some(self.factory.connect(&self.target)?);
        Ok(())
    }

    /// Only rows that pass validation replace the current-item label.
    fn describe(&self, item: &RawRecord) -> Option<String> {
        Domain::from_record(item).ok().map(|domain| domain.name)
    }

    async fn process(&mut self, item: RawRecord) -> Option<Domain> {
        let mut domain = match Domain::from_record(&item) {
            Ok(domain) => domain,
            Err(e) => {
                tracing::debug!("Discarding {:?}: {}", item, e);
                self.outcomes.record(outcome::INVALID);
                return None;
            }
        };

        let Some(lookup) = self.lookup.as_ref() else {
            domain.outcome = outcome::NO_NAMESERVERS.to_string();
            return Some(domain);
        };

        tracing::debug!("[{}] Resolving: {}", self.target, domain.name);
        match lookup.lookup_mx(&domain.name).await {
            Ok(answer) => {
                domain.answer = answer;
                domain.outcome = outcome::OK.to_string();
            }
            Err(failure) => {
                tracing::debug!("[{}] {}: {}", self.target, domain.name, failure);
                domain.outcome = failure.label().to_string();
            }
        }
        Some(domain)
    }
}
