use sqlx::{PgExecutor, PgPool};
use std::collections::{HashMap, HashSet};

use crate::models::{JobDependency, JobDependencyEdge};

pub async fn fetch_for_job(
    pool: &PgPool,
    job_id: &str,
) -> Result<Vec<JobDependency>, sqlx::Error> {
    sqlx::query_as::<_, JobDependency>(
        r#"
        SELECT depends_on_job_id, condition
        FROM job_dependencies
        WHERE job_id = $1
        ORDER BY depends_on_job_id
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

/// Batch fetch for a page of jobs, so listing never issues one dependency
/// query per job.
pub async fn fetch_for_jobs(
    pool: &PgPool,
    job_ids: &[String],
) -> Result<Vec<JobDependencyEdge>, sqlx::Error> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, JobDependencyEdge>(
        r#"
        SELECT job_id, depends_on_job_id, condition
        FROM job_dependencies
        WHERE job_id = ANY($1)
        "#,
    )
    .bind(job_ids.to_vec())
    .fetch_all(pool)
    .await
}

/// Job ids that declare a dependency on `job_id`.
pub async fn fetch_dependents(pool: &PgPool, job_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT job_id
        FROM job_dependencies
        WHERE depends_on_job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_all_edges<'e, E>(executor: E) -> Result<Vec<JobDependencyEdge>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, JobDependencyEdge>(
        "SELECT job_id, depends_on_job_id, condition FROM job_dependencies",
    )
    .fetch_all(executor)
    .await
}

pub async fn insert_edge<'e, E>(
    executor: E,
    job_id: &str,
    depends_on_job_id: &str,
    condition: &str,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO job_dependencies (job_id, depends_on_job_id, condition)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(job_id)
    .bind(depends_on_job_id)
    .bind(condition)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_edges_for_job<'e, E>(executor: E, job_id: &str) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("DELETE FROM job_dependencies WHERE job_id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Adjacency view of the edge set: job id → the job ids it depends on.
pub fn adjacency(edges: &[JobDependencyEdge]) -> HashMap<String, Vec<String>> {
    let mut adj: HashMap<String, Vec<String>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.job_id.clone())
            .or_default()
            .push(edge.depends_on_job_id.clone());
    }
    adj
}

/// Whether adding the edge `child depends_on parent` would close a cycle.
///
/// DFS over existing depends_on edges starting at the proposed parent: if
/// the child is reachable, the parent already (transitively) depends on the
/// child and the new edge must be rejected.
pub fn would_create_cycle(
    adj: &HashMap<String, Vec<String>>,
    child: &str,
    parent: &str,
) -> bool {
    if child == parent {
        return true;
    }

    let mut stack = vec![parent];
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(node) = stack.pop() {
        if node == child {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(parents) = adj.get(node) {
            stack.extend(parents.iter().map(String::as_str));
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let list: Vec<JobDependencyEdge> = pairs
            .iter()
            .map(|(child, parent)| JobDependencyEdge {
                job_id: child.to_string(),
                depends_on_job_id: parent.to_string(),
                condition: "success".to_string(),
            })
            .collect();
        adjacency(&list)
    }

    #[test]
    fn test_self_edge_is_cycle() {
        let adj = edges(&[]);
        assert!(would_create_cycle(&adj, "a", "a"));
    }

    #[test]
    fn test_direct_cycle_detected() {
        // b depends on a; adding a depends on b closes the loop
        let adj = edges(&[("b", "a")]);
        assert!(would_create_cycle(&adj, "a", "b"));
    }

    #[test]
    fn test_transitive_cycle_detected() {
        // c -> b -> a; adding a -> c closes the loop
        let adj = edges(&[("c", "b"), ("b", "a")]);
        assert!(would_create_cycle(&adj, "a", "c"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // d -> b -> a and d -> c -> a: shared ancestor, still a DAG
        let adj = edges(&[("d", "b"), ("d", "c"), ("b", "a"), ("c", "a")]);
        assert!(!would_create_cycle(&adj, "d", "a"));
    }

    #[test]
    fn test_duplicate_edge_is_not_a_cycle() {
        let adj = edges(&[("b", "a")]);
        assert!(!would_create_cycle(&adj, "b", "a"));
    }
}
