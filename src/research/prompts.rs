//! Prompt 模板：规划、工具选择、单步执行
//!
//! 措辞不属于契约，可随模型调整；结构化输出以 schema 模块为准。

/// 规划：将问题拆成有序、原子的研究步骤
pub fn planning_prompt(query: &str) -> String {
    format!(
        r#"#Task:
You are a meticulous and helpful research assistant. Your job is to break down a user's question into a clear, ordered list of research tasks needed to answer it fully.

#Guidelines:
- Output a numbered list of distinct, non-overlapping steps.
- Each step must describe a single, atomic task that can be completed independently.
- Avoid combining multiple tasks into one step.
- Use clear, objective language for each step.
- Do not include the answer, only the research or reasoning steps required to find it.
- Each step has two parts: a step number and a step instruction.

#User Question:
{query}
"#
    )
}

/// 工具选择：判断单个步骤需要 web_search 还是 llm
pub fn tool_selection_prompt(instruction: &str, original_query: &str) -> String {
    format!(
        r#"You are an intelligent assistant helping to decide which tool to use for a step in a research task.
For the provided step, choose the most appropriate tool from the following options:

- "web_search": use this if the step requires up-to-date information, statistics, current events, or knowledge not likely to be known by an AI model.
- "llm": use this if the step involves reasoning, summarization, general knowledge, definitions, or making inferences from existing information.

Instructions:
- Output a JSON object indicating the best tool to use for the step.
- Only choose "web_search" if the step clearly depends on external or real-time information.
- Only use the tools provided. Do not make up your own tools.

Original Research Task:
{original_query}

Step to determine tool for:
{instruction}

Respond in this format:
{{
  "tool": "llm"
}}
"#
    )
}

/// 单步执行：针对某个步骤给出详细研究结果
pub fn execution_prompt(step_text: &str, original_query: &str) -> String {
    format!(
        r#"#Task:
You are a meticulous and helpful researcher. A research task has been broken down into steps and you will be given one of the steps.
Your job is to research the step and provide a detailed response.

#Guidelines:
- Output a detailed response to the step.
- Use clear, objective language.

#Original Research Task
{original_query}

#Step for you to provide a response to:
{step_text}
"#
    )
}
