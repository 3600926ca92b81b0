//! Prompt contracts for the validation, generation and review stages
//!
//! The dataset description is rendered once from [`crate::schema`]; the rest
//! is fixed text. Each builder states the JSON shape the stage decodes.

use crate::schema::{self, COLUMNS};
use lazy_static::lazy_static;

lazy_static! {
    /// Natural-language description of the single table, including the data
    /// quirks the generator has to work around.
    pub static ref DATA_CONTEXT: String = render_data_context();
}

/// Dialect and style rules for generated SQL.
pub const SQL_CONTEXT: &str = r#"- The query runs on SQLite. Use SQLite syntax only.
- Write read-only SELECT statements. Temporary calculations (CTEs, subqueries) are fine.
- Never leave an aggregate unnamed: alias COUNT(*), SUM(...), AVG(...) and similar to a descriptive name such as patient_count or total_billing.
- For "the top", "the most", "the highest" and similar, rank with RANK() OVER (...) and keep rank 1 instead of using LIMIT 1, so that every tied record is returned.
- Dates are stored as text 'YYYY-MM-DD HH:MM:SS'; use SQLite date functions (date(), strftime(), julianday()) on them."#;

fn render_data_context() -> String {
    let mut out = format!(
        "There is exactly one table, named '{}', with about {} rows of hospital admission records.\n\
         Each record is one admission episode of one patient, not one patient: a patient admitted several times \
         appears in several records. The table is not normalized. A doctor's name in a record means the patient \
         of that record is that doctor's patient, so treat the table as a list of admissions to derive facts from.\n\n\
         Columns (use these exact names, with this exact casing):\n",
        schema::TABLE_NAME,
        schema::EXPECTED_ROWS
    );
    for column in COLUMNS {
        out.push_str(&format!(
            "- {} ({}): {}\n",
            column.name,
            column.kind.label(),
            column.description
        ));
    }

    let mixed_case: Vec<&str> = COLUMNS
        .iter()
        .filter(|c| c.case_insensitive_match)
        .map(|c| c.name)
        .collect();
    out.push_str(&format!(
        "\nIMPORTANT NOTES:\n\
         - Columns {} are stored in mixed case. Compare them in lowercase, e.g. LOWER(Name) = 'john doe', \
         but return the values in their original case.\n\
         - Some Hospital values are broken, e.g. \"Moreno Murphy, Griffith and\". A user asking for \
         \"Moreno Murphy and Griffith\" expects that value. Match every meaningful word of the hospital name \
         separately and combine the conditions with AND:\n  \
         WHERE LOWER(Hospital) LIKE '%moreno%' AND LOWER(Hospital) LIKE '%murphy%' AND LOWER(Hospital) LIKE '%griffith%'\n\
         - To find patient John Doe use LOWER(Name) = 'john doe'; doctors work the same way with LOWER(Doctor).\n",
        mixed_case.join(", ")
    ));
    out
}

/// Asks whether the request is read-only and answerable from the table.
/// Expected reply: `{"is_valid": bool, "message"?: string}`.
pub fn validation_prompt(user_query: &str) -> String {
    format!(
        r#"Decide whether the natural language request below can be served.
A request is valid only if BOTH hold:
- it does not ask to change data: no inserting, updating or deleting records in the table or database (temporary tables for calculation and analysis are allowed);
- it can be answered from the table described below.
---
Data description:
{context}
---
Reply with a JSON object:
{{"is_valid": true or false, "message": "why the request cannot be served (omit when is_valid is true)"}}
---
User request:
{user_query}"#,
        context = DATA_CONTEXT.as_str(),
        user_query = user_query
    )
}

/// Asks for one SQL query answering `user_query`.
/// Expected reply: `{"query": string}`.
pub fn generation_prompt(user_query: &str) -> String {
    format!(
        r#"You translate questions about a healthcare dataset into SQL.
Write ONLY read-only SQL. Never write queries that modify data.
---
Data:
{data_context}
Database and SQL:
{sql_context}
---
Reply with a JSON object:
{{"query": "<the SQL query>"}}
---
User request:
{user_query}"#,
        data_context = DATA_CONTEXT.as_str(),
        sql_context = SQL_CONTEXT,
        user_query = user_query
    )
}

/// Asks for a critique of `sql` as an answer to `user_query`.
/// Expected reply: `{"reasoning": string, "is_correct": bool}`.
pub fn review_prompt(user_query: &str, sql: &str) -> String {
    format!(
        r#"Check whether the SQL below correctly answers the natural language request (NLQ).

Check each point SEPARATELY against the NLQ and mention every one of them in your reasoning:
- references: in complex requests a pronoun such as "them" may refer to more than one earlier entity; make sure the SQL binds it to the right one;
- logical structure: the operations in the SQL must match the NLQ, including their order;
- string filters: conditions on text columns must follow the matching rules in the data context;
- ties: when the top record by a computed value is asked for, several records can share the top value, so RANK() is needed rather than LIMIT;
- grouping: some requests need group, aggregate, filter, then group and aggregate again (e.g. the top subgroup inside the top group), which differs from a single double grouping that picks the top subgroup across all groups.

SQL:
{sql}

NLQ:
{user_query}
---
Reply with a JSON object:
{{"reasoning": "your findings and what to change if the SQL is wrong", "is_correct": true or false}}
---
Data context:
{data_context}

SQL context:
{sql_context}"#,
        sql = sql,
        user_query = user_query,
        data_context = DATA_CONTEXT.as_str(),
        sql_context = SQL_CONTEXT
    )
}

/// Instruction handed back to the generator after a failed review.
pub fn regeneration_instruction(user_query: &str, sql: &str, review: &str) -> String {
    format!(
        r#"Given the original user request, the SQL written for it and a review of that SQL, write a corrected SQL query.

Original user request:
{user_query}
***
Original SQL query:
{sql}
***
Review: "{review}""#,
        user_query = user_query,
        sql = sql,
        review = review
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_context_lists_every_column() {
        for column in COLUMNS {
            assert!(DATA_CONTEXT.contains(column.name), "missing {}", column.name);
        }
        assert!(DATA_CONTEXT.contains("table, named 'df'"));
        assert!(DATA_CONTEXT.contains("Name, Doctor, Hospital"));
    }

    #[test]
    fn test_prompts_embed_request_and_contract() {
        let request = "How many patients does doctor Jane Doe have?";

        let validation = validation_prompt(request);
        assert!(validation.ends_with(request));
        assert!(validation.contains("\"is_valid\""));

        let generation = generation_prompt(request);
        assert!(generation.ends_with(request));
        assert!(generation.contains("{\"query\":"));
        assert!(generation.contains("RANK()"));

        let review = review_prompt(request, "SELECT COUNT(*) AS patient_count FROM df");
        assert!(review.contains(request));
        assert!(review.contains("SELECT COUNT(*) AS patient_count FROM df"));
        assert!(review.contains("\"is_correct\""));
    }

    #[test]
    fn test_regeneration_instruction_carries_feedback() {
        let text = regeneration_instruction("q", "SELECT 1", "wrong grouping order");
        assert!(text.contains("Original user request:\nq"));
        assert!(text.contains("SELECT 1"));
        assert!(text.ends_with("Review: \"wrong grouping order\""));
    }
}
