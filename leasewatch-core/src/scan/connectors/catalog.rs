use std::sync::Arc;
use std::time::Duration;

use leasewatch_model::{SourceDescriptor, SourceId};

use crate::scan::connector::{CollectedItem, SourceRegistry};

use super::scripted::{ScriptedConnector, SourceScript};

const BUILTIN: [(&str, &str, &str); 6] = [
    ("dnb", "D&B", "Business credit reports and payment behaviour"),
    ("moodys", "Moody's", "Credit ratings and rating actions"),
    ("sec", "SEC Filings", "Periodic reports and material event filings"),
    ("news", "News & Press", "News coverage and press releases"),
    ("courts", "Court Records", "Bankruptcy dockets and civil litigation"),
    ("custom", "Custom Sources", "Operator-configured feeds"),
];

pub fn builtin_descriptors() -> Vec<SourceDescriptor> {
    BUILTIN
        .iter()
        .map(|(id, name, description)| {
            SourceDescriptor::new(*id, *name, *description)
        })
        .collect()
}

pub fn builtin_descriptor(id: &SourceId) -> Option<SourceDescriptor> {
    BUILTIN
        .iter()
        .find(|(key, _, _)| *key == id.as_str())
        .map(|(id, name, description)| {
            SourceDescriptor::new(*id, *name, *description)
        })
}

/// Registry of scripted connectors for every built-in source, emitting a
/// small fixed portfolio of findings at `pace` per item.
pub fn demo_registry(pace: Duration) -> SourceRegistry {
    let tenants = ["acme-retail", "brightside-dental", "corner-bistro"];
    let mut registry = SourceRegistry::new();

    for descriptor in builtin_descriptors() {
        let source = descriptor.id.to_string();
        let mut items = Vec::new();
        for tenant in tenants {
            items.push(CollectedItem::info(
                tenant,
                format!("{} profile refreshed for {tenant}", descriptor.name),
            ));
        }
        match source.as_str() {
            "dnb" => {
                items.push(CollectedItem::score_change(
                    "corner-bistro",
                    -1,
                    "Paydex score fell below 50",
                ));
            }
            "moodys" => {
                items.push(CollectedItem::score_change(
                    "acme-retail",
                    1,
                    "Parent credit rating upgraded",
                ));
            }
            "sec" => {
                items.push(CollectedItem::finding(
                    "acme-retail",
                    "Quarterly revenue up 8% year over year",
                ));
            }
            "news" => {
                items.push(CollectedItem::finding(
                    "brightside-dental",
                    "Announced leadership change: new CFO appointed",
                ));
            }
            "courts" => {
                items.push(CollectedItem::alert(
                    "corner-bistro",
                    "Civil lawsuit filed by landlord of second location",
                ));
            }
            _ => {}
        }

        registry.register(Arc::new(ScriptedConnector::new(
            descriptor,
            SourceScript {
                items,
                item_delay: pace,
                connect_delay: pace,
                ..SourceScript::default()
            },
        )));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_builtin_source() {
        let ids: Vec<_> = builtin_descriptors()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, ["dnb", "moodys", "sec", "news", "courts", "custom"]);
        assert_eq!(
            builtin_descriptor(&SourceId::from("moodys")).map(|d| d.name),
            Some("Moody's".to_string())
        );
        assert!(builtin_descriptor(&SourceId::from("fax")).is_none());
    }

    #[test]
    fn demo_registry_covers_catalog() {
        let registry = demo_registry(Duration::ZERO);
        assert_eq!(registry.len(), 6);
        assert!(registry.contains(&SourceId::from("courts")));
    }
}
