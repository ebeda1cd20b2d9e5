//! 研究报告：按父子关系缩进展示一次 Query 的步骤树

use std::collections::HashMap;
use std::fmt;

use crate::store::{Query, Step};

const DESCRIPTION_PREVIEW_CHARS: usize = 80;
const RESPONSE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct QueryReport {
    pub query: Query,
    /// 按 step_number 升序
    pub steps: Vec<Step>,
}

impl QueryReport {
    /// 执行步骤（LLM / WEB_SEARCH）中已完成的回复，按编号排序
    pub fn findings(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.step_type,
                    crate::store::StepType::Llm | crate::store::StepType::WebSearch
                ) && s.response.is_some()
            })
            .collect()
    }

    fn children(&self) -> HashMap<Option<&str>, Vec<&Step>> {
        let mut map: HashMap<Option<&str>, Vec<&Step>> = HashMap::new();
        for step in &self.steps {
            map.entry(step.parent_step_id.as_deref()).or_default().push(step);
        }
        map
    }

    fn write_tree<'a>(
        &self,
        f: &mut fmt::Formatter<'_>,
        children: &HashMap<Option<&'a str>, Vec<&'a Step>>,
        parent: Option<&'a str>,
        depth: usize,
    ) -> fmt::Result {
        let Some(steps) = children.get(&parent) else {
            return Ok(());
        };
        for step in steps {
            let indent = "  ".repeat(depth + 1);
            let label = step
                .instruction
                .clone()
                .unwrap_or_else(|| preview(&step.description, DESCRIPTION_PREVIEW_CHARS));
            writeln!(
                f,
                "{}#{} [{}] {} ({}) {}",
                indent,
                step.step_number,
                step.step_type.as_str(),
                step.status.as_str(),
                step.tool,
                label
            )?;
            if let Some(response) = &step.response {
                writeln!(f, "{}  => {}", indent, preview(response, RESPONSE_PREVIEW_CHARS))?;
            }
            self.write_tree(f, children, Some(step.id.as_str()), depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for QueryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query {} [{}]", self.query.id, self.query.status.as_str())?;
        writeln!(f, "  {}", self.query.value)?;
        let children = self.children();
        self.write_tree(f, &children, None, 0)?;

        // 父步骤不在本 Query 内的孤儿步骤
        let known: std::collections::HashSet<&str> =
            self.steps.iter().map(|s| s.id.as_str()).collect();
        for (parent, steps) in &children {
            if let Some(parent) = parent {
                if !known.contains(parent) {
                    for step in steps {
                        writeln!(
                            f,
                            "  ? #{} [{}] orphan of {}",
                            step.step_number,
                            step.step_type.as_str(),
                            parent
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
