//! Table output for the CLI

use crate::broker::{Binding, BrokerStats, PublishResult, PublishStatus};
use crate::core::styles::StyleRole;
use prettytable::{format, Cell, Row, Table};

fn new_table(titles: &[&str], use_color: bool) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    let spec = format!("b{}", StyleRole::Header.table_spec(use_color));
    table.set_titles(Row::new(
        titles
            .iter()
            .map(|title| Cell::new(title).style_spec(&spec))
            .collect(),
    ));
    table
}

fn cell(text: impl ToString, role: StyleRole, use_color: bool) -> Cell {
    Cell::new(&text.to_string()).style_spec(&role.table_spec(use_color))
}

fn count(value: impl ToString) -> Cell {
    Cell::new(&value.to_string()).style_spec("r")
}

/// Exchanges, queues and bindings of a broker snapshot
pub fn topology(stats: &BrokerStats, bindings: &[Binding], use_color: bool) -> String {
    let mut exchanges = new_table(&["Exchange", "Kind", "Bindings"], use_color);
    for exchange in &stats.exchanges {
        exchanges.add_row(Row::new(vec![
            cell(&exchange.name, StyleRole::Name, use_color),
            Cell::new(&exchange.kind),
            count(exchange.bindings),
        ]));
    }

    let mut queues = new_table(&["Queue", "Kind", "Dead letter"], use_color);
    for queue in &stats.queues {
        queues.add_row(Row::new(vec![
            cell(&queue.name, StyleRole::Name, use_color),
            Cell::new(&queue.kind),
            match &queue.dead_letter {
                Some(target) => Cell::new(target),
                None => cell("-", StyleRole::Dim, use_color),
            },
        ]));
    }

    let mut routes = new_table(&["Exchange", "Queue", "Pattern", "Arguments"], use_color);
    for binding in bindings {
        let arguments = binding
            .arguments
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        routes.add_row(Row::new(vec![
            Cell::new(&binding.exchange),
            Cell::new(&binding.queue),
            Cell::new(&binding.pattern),
            Cell::new(&arguments),
        ]));
    }

    format!("{}\n{}\n{}", exchanges, queues, routes)
}

/// Queue, exchange and dead-letter counters
pub fn stats(stats: &BrokerStats, use_color: bool) -> String {
    let mut queues = new_table(
        &[
            "Queue", "Kind", "Depth", "Ready", "Unacked", "Enqueued", "Acked", "Rejected",
            "Expired", "Overflow",
        ],
        use_color,
    );
    for queue in &stats.queues {
        let depth_role = if queue.depth > 0 {
            StyleRole::Warning
        } else {
            StyleRole::Healthy
        };
        queues.add_row(Row::new(vec![
            cell(&queue.name, StyleRole::Name, use_color),
            Cell::new(&queue.kind),
            Cell::new(&queue.depth.to_string())
                .style_spec(&format!("r{}", depth_role.table_spec(use_color))),
            count(queue.ready),
            count(queue.unacked),
            count(queue.enqueued),
            count(queue.acked),
            count(queue.rejected),
            count(queue.expired),
            count(queue.overflowed),
        ]));
    }

    let mut exchanges = new_table(&["Exchange", "In", "Routed", "Unroutable"], use_color);
    for exchange in &stats.exchanges {
        let unroutable_role = if exchange.messages_unroutable > 0 {
            StyleRole::Error
        } else {
            StyleRole::Count
        };
        exchanges.add_row(Row::new(vec![
            cell(&exchange.name, StyleRole::Name, use_color),
            count(exchange.messages_in),
            count(exchange.messages_routed),
            cell(exchange.messages_unroutable, unroutable_role, use_color),
        ]));
    }

    let dead = &stats.dead_letters;
    format!(
        "{} {}\n\n{}\n{}\n{} expired {}, overflow {}, rejected {}, routed {}, dropped {} ({} cycles)\n",
        StyleRole::Header.paint("Captured", use_color),
        stats.captured_at,
        queues,
        exchanges,
        StyleRole::Header.paint("Dead letters:", use_color),
        dead.expired,
        dead.overflow,
        dead.rejected,
        dead.routed,
        dead.dropped,
        dead.cycles
    )
}

/// One line per publish outcome
pub fn publish_result(result: &PublishResult, use_color: bool) -> String {
    let status = match result.status {
        PublishStatus::Routed => StyleRole::Healthy,
        PublishStatus::Unroutable => StyleRole::Error,
        PublishStatus::Duplicate => StyleRole::Warning,
    }
    .paint(result.status.as_ref(), use_color);

    let queues = result
        .copies
        .iter()
        .map(|(queue, id)| format!("{}#{}", queue, id))
        .collect::<Vec<_>>()
        .join(", ");
    format!("message {} {} [{}]", result.message_id, status, queues)
}
