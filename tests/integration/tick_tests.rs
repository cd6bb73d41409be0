use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use price_refresher::models::Tier;
use price_refresher::reconciler::Reconciler;
use price_refresher::utils::error::AppError;

#[tokio::test]
async fn test_tick_creates_price_for_new_product() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let product = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("60414", 49.99);
    let (launcher, closes) = counting_launcher(1);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let report = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;

    assert_eq!(report.selected, 1);
    assert_eq!(report.observed, 1);
    assert_eq!(report.created, 1);
    assert!(report.item_failures.is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let stored = catalog.get_price(product.id, retailer.id).await?.expect("price stored");
    assert_eq!(stored.price, Some(49.99));
    assert_eq!(stored.in_stock, Some(true));
    assert!(stored.price_history.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_api_with_stealth_mode_fails_before_scraping() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let mut new = new_retailer(RETAILER_NAME, ScrapingMethod::Api, BrowserMode::Uc);
    new.excluded_brands.clear();

    // Written around insert_retailer, which would refuse this combination.
    let retailer_id = sqlx::query(
        "INSERT INTO retailers (name, base_url, scraping_config, scrape_intervals, excluded_brands) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&new.name)
    .bind(&new.base_url)
    .bind(serde_json::to_string(&new.scraping_config)?)
    .bind(serde_json::to_string(&new.scrape_intervals)?)
    .bind(serde_json::to_string(&new.excluded_brands)?)
    .execute(catalog.pool())
    .await?
    .last_insert_rowid();
    let product = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("60414", 49.99);
    let (launcher, closes) = counting_launcher(0);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let result = orchestrator.run_tick(retailer_id, Tier::CurrentYear).await;

    assert!(matches!(result, Err(AppError::InvalidConfiguration(_))));
    assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert!(catalog.get_price(product.id, retailer_id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_unit_does_not_stop_the_batch() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let first = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;
    let broken = seed_product(&catalog, "60415", Some("LEGO"), Some(current_year())).await?;
    let third = seed_product(&catalog, "60416", Some("LEGO"), Some(current_year())).await?;
    let missing = seed_product(&catalog, "60417", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("60414", 19.99);
    scraper.set_failure("60415", "price element vanished");
    scraper.set_price("60416", 29.99);
    let (launcher, closes) = counting_launcher(1);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let report = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;

    assert_eq!(report.selected, 4);
    assert_eq!(report.observed, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.item_failures.len(), 1);
    assert_eq!(report.item_failures[0].product_id, broken.id);
    assert!(report.item_failures[0].error.contains("price element vanished"));
    assert_eq!(scraper.calls.load(Ordering::SeqCst), 4);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    assert!(catalog.get_price(first.id, retailer.id).await?.is_some());
    assert!(catalog.get_price(third.id, retailer.id).await?.is_some());
    assert!(catalog.get_price(broken.id, retailer.id).await?.is_none());
    assert!(catalog.get_price(missing.id, retailer.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_acquisition_failure_ends_only_that_tick() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let product = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("60414", 49.99);

    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let mut launcher = MockLauncher::new();
    let mut launch_seq = mockall::Sequence::new();
    launcher
        .expect_launch()
        .times(1)
        .in_sequence(&mut launch_seq)
        .returning(|_| Err(SessionError::Launch("chrome crashed".to_string())));
    launcher
        .expect_launch()
        .times(1)
        .in_sequence(&mut launch_seq)
        .returning(move |_| {
            let session: Box<dyn ScrapeSession> = Box::new(CountingSession {
                closes: Arc::clone(&counter),
            });
            Ok(session)
        });
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let first = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await;
    assert!(matches!(first, Err(AppError::Acquisition(_))));
    assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
    assert!(catalog.get_price(product.id, retailer.id).await?.is_none());

    let second = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;
    assert_eq!(second.created, 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_fresh_catalog_skips_session() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("60414", 49.99);
    let (launcher, closes) = counting_launcher(1);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let first = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;
    let second = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;

    assert_eq!(first.created, 1);
    assert_eq!(second.selected, 0);
    assert_eq!(second.observed, 0);
    assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_price_change_is_tracked_across_ticks() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let product = seed_product(&catalog, "42151", Some("LEGO"), Some(current_year() - 1)).await?;

    // A price last seen 13 hours ago is past the 12 hour previous-year interval.
    let seen = Utc::now() - ChronoDuration::hours(13);
    Reconciler::new(catalog.clone())
        .reconcile_at(
            &Observation {
                product_id: product.id,
                retailer_id: retailer.id,
                price: Some(24.99),
                shipping_cost: None,
                in_stock: Some(true),
                url: None,
            },
            seen,
        )
        .await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("42151", 19.99);
    let (launcher, _closes) = counting_launcher(1);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let report = orchestrator.run_tick(retailer.id, Tier::PreviousYear).await?;

    assert_eq!(report.selected, 1);
    assert_eq!(report.updated, 1);
    let stored = catalog.get_price(product.id, retailer.id).await?.expect("price stored");
    assert_eq!(stored.price, Some(19.99));
    assert_eq!(stored.price_history.len(), 1);
    assert_eq!(stored.price_history[0].price, Some(24.99));
    assert_eq!(stored.price_history[0].datetime, seen);
    Ok(())
}

#[tokio::test]
async fn test_excluded_brand_is_never_scraped() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let cobi = seed_product(&catalog, "2416", Some("Cobi"), Some(current_year())).await?;
    seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    scraper.set_price("2416", 39.99);
    scraper.set_price("60414", 49.99);
    let (launcher, _closes) = counting_launcher(1);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let report = orchestrator.run_tick(retailer.id, Tier::CurrentYear).await?;

    assert_eq!(report.selected, 1);
    assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
    assert!(catalog.get_price(cobi.id, retailer.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_retailer_and_missing_scraper() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let other = catalog
        .insert_retailer(&new_retailer("Brick Haus", ScrapingMethod::Ui, BrowserMode::Wire))
        .await?;

    let scraper = ScriptedScraper::new(RETAILER_NAME);
    let (launcher, _closes) = counting_launcher(0);
    let orchestrator = create_orchestrator(catalog.clone(), launcher, &scraper).await;

    let unknown = orchestrator.run_tick(4711, Tier::Older).await;
    assert!(matches!(unknown, Err(AppError::NotFound { .. })));

    let unscraped = orchestrator.run_tick(other.id, Tier::Older).await;
    match unscraped {
        Err(AppError::NotFound { resource }) => assert!(resource.contains("Brick Haus")),
        result => panic!("expected missing scraper, got {:?}", result),
    }
    Ok(())
}
