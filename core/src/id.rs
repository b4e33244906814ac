//! Message id generation.

use std::sync::Arc;

use uuid::Uuid;

/// Generator for message unique identifiers.
///
/// Every broker receives its id factory explicitly at construction; the
/// default produces UUID v4 strings.
pub type IdFactory = Arc<dyn Fn() -> String + Send + Sync>;

/// Returns the default UUID v4 id factory.
#[must_use]
pub fn default_id_factory() -> IdFactory {
    Arc::new(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_yields_unique_ids() {
        let factory = default_id_factory();
        let a = factory();
        let b = factory();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
