use std::sync::atomic::Ordering;

use anyhow::Result;
use email_service::{
    models::template::TemplateInput,
    services::template_cache::{ALL_TEMPLATES_KEY, TemplateCache, template_key},
};

use crate::support::{FakeCache, FakeStore};

fn input(name: &str, subject: &str) -> TemplateInput {
    TemplateInput {
        name: name.to_string(),
        description: None,
        subject: subject.to_string(),
        html_content: "<p>{{user_name}}</p>".to_string(),
        variables: vec!["user_name".to_string()],
    }
}

#[tokio::test]
async fn second_read_is_served_from_cache() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let template = store.add_template("welcome", "Hi", "<p>Hi</p>");
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);

    let first = templates.get(template.id).await?;
    let second = templates.get(template.id).await?;

    assert_eq!(first, Some(template.clone()));
    assert_eq!(second, first);
    assert_eq!(store.template_reads.load(Ordering::SeqCst), 1);
    assert!(cache.contains(&template_key(template.id)));

    Ok(())
}

#[tokio::test]
async fn missing_templates_are_not_cached() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);

    assert!(templates.get(404).await?.is_none());
    assert!(templates.get(404).await?.is_none());

    assert_eq!(store.template_reads.load(Ordering::SeqCst), 2);
    assert!(!cache.contains(&template_key(404)));

    Ok(())
}

#[tokio::test]
async fn update_invalidates_single_and_list_entries() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let template = store.add_template("welcome", "Hi", "<p>Hi</p>");
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);

    templates.list().await?;
    templates.get(template.id).await?;
    assert!(cache.contains(ALL_TEMPLATES_KEY));

    let updated = templates
        .update(template.id, &input("welcome", "Hello again"))
        .await?
        .expect("template exists");
    assert_eq!(updated.subject, "Hello again");

    assert!(!cache.contains(ALL_TEMPLATES_KEY));
    assert!(!cache.contains(&template_key(template.id)));

    let reread = templates.get(template.id).await?.expect("template exists");
    assert_eq!(reread.subject, "Hello again");

    Ok(())
}

#[tokio::test]
async fn create_and_delete_invalidate_the_list() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);

    assert!(templates.list().await?.is_empty());

    let created = templates.create(&input("receipt", "Your receipt")).await?;
    assert_eq!(templates.list().await?, vec![created.clone()]);

    assert!(templates.delete(created.id).await?);
    assert!(templates.list().await?.is_empty());
    assert!(!templates.delete(created.id).await?);

    Ok(())
}

#[tokio::test]
async fn entries_expire_after_ttl() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let template = store.add_template("welcome", "Hi", "<p>Hi</p>");
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);

    templates.get(template.id).await?;
    cache.advance(std::time::Duration::from_secs(301));
    templates.get(template.id).await?;

    assert_eq!(store.template_reads.load(Ordering::SeqCst), 2);

    Ok(())
}

#[tokio::test]
async fn cache_outage_falls_back_to_store() -> Result<()> {
    let store = FakeStore::new();
    let cache = FakeCache::new();
    let template = store.add_template("welcome", "Hi", "<p>Hi</p>");
    let templates = TemplateCache::new(store.clone(), cache.clone(), 300);
    cache.set_offline(true);

    assert_eq!(templates.get(template.id).await?, Some(template.clone()));
    assert_eq!(templates.list().await?.len(), 1);

    let created = templates.create(&input("receipt", "Your receipt")).await?;
    assert_eq!(created.name, "receipt");

    Ok(())
}
