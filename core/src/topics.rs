//! Topic and queue naming helpers.

/// Kind segment for asynchronous commands.
pub const KIND_COMMAND: &str = "command";
/// Kind segment for domain events.
pub const KIND_DOMAIN_EVENT: &str = "domain_event";

/// Forms an Async API topic name,
/// e.g. `organization.service.1.domain_event.user.created`.
#[must_use]
pub fn format_topic_name(
    organization: &str,
    service: &str,
    kind: &str,
    entity: &str,
    action: &str,
    version: u32,
) -> String {
    format!("{organization}.{service}.{version}.{kind}.{entity}.{action}")
}

/// Forms an Async API queue name,
/// e.g. `service.user.send_welcome_on_created`.
#[must_use]
pub fn format_queue_name(service: &str, entity: &str, action: &str, event: &str) -> String {
    format!("{service}.{entity}.{action}_on_{event}")
}

/// Names the retry topic of `topic`. Handlers publish there with
/// [`EventWriter::write_retry`](crate::writer::EventWriter::write_retry) to
/// take a failed message out of the main flow.
#[must_use]
pub fn retry_topic(topic: &str) -> String {
    format!("retry.{topic}")
}

/// Names the dead-letter topic of `topic`, the terminal parking spot for
/// messages past their redelivery cap.
#[must_use]
pub fn dead_letter_topic(topic: &str) -> String {
    format!("dead_letter.{topic}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_layout() {
        assert_eq!(
            format_topic_name("neutrino", "organizations", KIND_COMMAND, "user", "create", 1),
            "neutrino.organizations.1.command.user.create"
        );
        assert_eq!(
            format_topic_name("neutrino", "iam", KIND_DOMAIN_EVENT, "user", "created", 2),
            "neutrino.iam.2.domain_event.user.created"
        );
    }

    #[test]
    fn queue_name_layout() {
        assert_eq!(
            format_queue_name("organizations", "user", "send_email", "created"),
            "organizations.user.send_email_on_created"
        );
    }

    #[test]
    fn redelivery_topic_names() {
        assert_eq!(retry_topic("chat.0"), "retry.chat.0");
        assert_eq!(dead_letter_topic("chat.0"), "dead_letter.chat.0");
    }
}
