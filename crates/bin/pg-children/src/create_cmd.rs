use pg_children::CreateChildError;
use pg_children_config::Config;

pub async fn run(config: &Config, name: Option<&str>) -> Result<(), CreateChildError> {
    let pool = config.children_pool();
    let child = pool.create_child(name).await?;

    println!("{}", child.database);
    Ok(())
}
