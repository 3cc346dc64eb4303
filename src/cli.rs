//! Pure formatting for the `/bc` human-readable summary. Command
//! registration is a host concern; this module only builds the string.

use crate::model::DeviceContext;
use crate::time_util::now_epoch;

pub fn summary(context: &DeviceContext) -> String {
    let mut lines = Vec::new();

    match &context.device.battery {
        Some(b) => lines.push(format!("Battery: {:.0}% ({})", b.level * 100.0, b.state)),
        None => lines.push("Battery: unknown".to_string()),
    }

    match &context.device.location {
        Some(loc) => match &loc.label {
            Some(label) => lines.push(format!("Location: {label}")),
            None => lines.push(format!("Location: {:.4}, {:.4}", loc.latitude, loc.longitude)),
        },
        None => lines.push("Location: unknown".to_string()),
    }

    match (&context.activity.current_zone, context.activity.zone_entered_at) {
        (Some(zone), Some(entered_at)) => {
            let minutes = ((now_epoch() - entered_at) / 60.0).max(0.0).round();
            lines.push(format!("Zone: {zone} (for {minutes:.0}m)"));
        }
        (Some(zone), None) => lines.push(format!("Zone: {zone}")),
        (None, _) => lines.push("Zone: away".to_string()),
    }

    match context.device.health.steps_today {
        Some(steps) => lines.push(format!("Steps today: {steps:.0}")),
        None => lines.push("Steps today: unknown".to_string()),
    }

    lines.push(format!("Events today: {}, pushes today: {}", context.meta.events_today, context.meta.pushes_today));

    lines.join("\n")
}
