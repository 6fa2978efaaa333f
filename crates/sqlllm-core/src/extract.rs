//! Turn raw model output into one candidate SQL line.

const SQL_FENCE: &str = "```sql";
const FENCE: &str = "```";

/// Collapse whitespace, then keep only the last ```` ```sql ```` block if the
/// output has one.
///
/// Never fails; the result may be empty.
pub fn clean_generated_sql(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let body = match last_sql_fence(&collapsed) {
        Some(start) => {
            let rest = &collapsed[start + SQL_FENCE.len()..];
            match rest.find(FENCE) {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => collapsed.as_str(),
    };

    body.trim().to_string()
}

/// Byte offset of the last ```` ```sql ```` opening marker (any case), not
/// counting longer tags such as ```` ```sqlite ````.
fn last_sql_fence(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    lower
        .rmatch_indices(SQL_FENCE)
        .map(|(i, _)| i)
        .find(|&i| {
            lower[i + SQL_FENCE.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric())
        })
}
