//! Referential integrity between services and networks

use crate::compose::ComposeDocument;

/// Outcome of a deletion check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCheck {
    /// Whether the network can be removed
    pub deletable: bool,
    /// Every service that still references the network, in document order
    pub blocking: Vec<String>,
}

/// Network integrity guard
///
/// A network may only be removed when no service references it. Running state
/// is irrelevant: a stopped service still pins its networks.
pub struct NetworkGuard;

impl NetworkGuard {
    /// Check whether `network` can be deleted from `document`
    pub fn can_delete(document: &ComposeDocument, network: &str) -> DeleteCheck {
        let blocking: Vec<String> = Self::referencing(document, network)
            .map(str::to_string)
            .collect();

        DeleteCheck {
            deletable: blocking.is_empty(),
            blocking,
        }
    }

    /// Services referencing `network`
    pub fn referencing<'a>(
        document: &'a ComposeDocument,
        network: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        document
            .list_services()
            .iter()
            .filter(move |s| s.network_names().any(|n| n == network))
            .map(|s| s.name.as_str())
    }

    /// Number of services referencing each declared network
    pub fn reference_counts(document: &ComposeDocument) -> Vec<(String, usize)> {
        document
            .networks()
            .iter()
            .map(|net| (net.name.clone(), Self::referencing(document, &net.name).count()))
            .collect()
    }
}
