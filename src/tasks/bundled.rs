//! Programs shipped with the client, used when the service cannot provide one.

use crate::model::TaskId;

use super::Variant;

const TASK1_EXAMPLE: &str = include_str!("programs/task1_example.asm");
const TASK1_TEMPLATE: &str = include_str!("programs/task1_template.asm");
const TASK2_EXAMPLE: &str = include_str!("programs/task2_example.asm");
const TASK2_TEMPLATE: &str = include_str!("programs/task2_template.asm");

pub fn program(task: TaskId, variant: Variant) -> Option<&'static str> {
    match (task.0, variant) {
        (1, Variant::Example) => Some(TASK1_EXAMPLE),
        (1, Variant::Template) => Some(TASK1_TEMPLATE),
        (2, Variant::Example) => Some(TASK2_EXAMPLE),
        (2, Variant::Template) => Some(TASK2_TEMPLATE),
        _ => None,
    }
}

pub fn example(task: TaskId) -> Option<&'static str> {
    program(task, Variant::Example)
}

pub fn template(task: TaskId) -> Option<&'static str> {
    program(task, Variant::Template)
}
