//! Ordered first-success-wins fallback

use std::future::Future;

/// Try `attempt` on each candidate in order and stop at the first success.
///
/// Returns the winning candidate with its value, or every `(candidate, error)`
/// pair in the order they were tried.
pub async fn first_success<C, T, E, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<(C, T), Vec<(C, E)>>
where
    C: Clone,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        match attempt(candidate.clone()).await {
            Ok(value) => return Ok((candidate, value)),
            Err(err) => failures.push((candidate, err)),
        }
    }
    Err(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let result = first_success(vec!["a", "b"], |c| async move { Ok::<_, ()>(c.len()) }).await;
        assert_eq!(result, Ok(("a", 1)));
    }

    #[tokio::test]
    async fn test_later_candidate_wins() {
        let mut tried = Vec::new();
        let result = first_success(vec![1, 2, 3], |c| {
            tried.push(c);
            async move {
                if c == 3 {
                    Ok(c * 10)
                } else {
                    Err(format!("{} failed", c))
                }
            }
        })
        .await;
        assert_eq!(result, Ok((3, 30)));
        assert_eq!(tried, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stops_after_success() {
        let mut tried = Vec::new();
        let _ = first_success(vec![1, 2, 3], |c| {
            tried.push(c);
            async move { Ok::<_, ()>(c) }
        })
        .await;
        assert_eq!(tried, vec![1]);
    }

    #[test]
    fn test_all_fail_reports_in_order() {
        let result = tokio_test::block_on(first_success(vec!["x", "y"], |c| async move {
            Err::<(), _>(format!("{} down", c))
        }));
        assert_eq!(
            result,
            Err(vec![("x", "x down".to_string()), ("y", "y down".to_string())])
        );
    }
}
