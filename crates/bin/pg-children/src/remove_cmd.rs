use pg_children::RemoveChildError;
use pg_children_config::Config;

pub async fn run(config: &Config, name: &str) -> Result<(), RemoveChildError> {
    let pool = config.children_pool();
    let child = config.admin.with_database(name);

    if let Err(err) = pool.remove_child(&child).await {
        if let RemoveChildError::Leak(leak) = &err {
            eprintln!(
                "database '{}' is left as '{}'; rename it back or drop it manually",
                leak.database, leak.temp_database
            );
        }
        return Err(err);
    }

    tracing::info!(database = %name, "removed");
    Ok(())
}
