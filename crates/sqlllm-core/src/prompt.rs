//! Prompt template for question-to-SQL generation.

/// Build the single prompt used for every attempt of one request.
///
/// Missing domain knowledge renders as an empty block.
pub fn build_prompt(schema_text: &str, question: &str, domain_knowledge: Option<&str>) -> String {
    let domain_knowledge = domain_knowledge.unwrap_or_default();
    let prompt = format!(
        r#"You are an expert in converting English questions to SQL query!

The SQL database details:
{schema}

Question:
{question}

Domain Knowledge:
{domain_knowledge}

Generate a SQL query based on the provided database details, English question and domain knowledge. Also the sql code should not have ``` in beginning or end and sql word in output."#,
        schema = schema_text.trim(),
        question = question.trim(),
        domain_knowledge = domain_knowledge.trim(),
    );
    prompt.trim().to_string()
}
