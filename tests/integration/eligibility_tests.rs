use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use price_refresher::eligibility::EligibilitySelector;
use price_refresher::models::{Price, Tier};

async fn seed_price(
    catalog: &SqliteCatalog,
    product_id: i64,
    retailer_id: i64,
    age: ChronoDuration,
) -> anyhow::Result<()> {
    let observation = Observation {
        product_id,
        retailer_id,
        price: Some(29.99),
        shipping_cost: None,
        in_stock: Some(true),
        url: None,
    };
    let price = Price::from_observation(&observation, Utc::now() - age);
    assert!(catalog.upsert_price(&price, None).await?);
    Ok(())
}

fn ids(units: &[ScrapeUnit]) -> Vec<i64> {
    units.iter().map(|u| u.product_id).collect()
}

#[tokio::test]
async fn test_unpriced_current_year_product_is_selected() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let product = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;
    let selector = EligibilitySelector::new(catalog.clone());

    let units = selector.select(&retailer, Tier::CurrentYear).await?;

    assert_eq!(ids(&units), vec![product.id]);
    assert_eq!(units[0].retailer_id, retailer.id);
    assert_eq!(units[0].manufacturer_id.as_deref(), Some("60414"));
    assert!(selector.select(&retailer, Tier::PreviousYear).await?.is_empty());
    assert!(selector.select(&retailer, Tier::Older).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fresh_prices_are_skipped() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let fresh = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;
    let stale = seed_product(&catalog, "60415", Some("LEGO"), Some(current_year())).await?;
    seed_price(&catalog, fresh.id, retailer.id, ChronoDuration::hours(5)).await?;
    seed_price(&catalog, stale.id, retailer.id, ChronoDuration::hours(7)).await?;

    let units = EligibilitySelector::new(catalog.clone())
        .select(&retailer, Tier::CurrentYear)
        .await?;

    assert_eq!(ids(&units), vec![stale.id]);
    Ok(())
}

#[tokio::test]
async fn test_price_exactly_one_interval_old_is_not_due() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let product = seed_product(&catalog, "42151", Some("LEGO"), Some(current_year() - 1)).await?;

    let now = Utc::now();
    let observation = Observation {
        product_id: product.id,
        retailer_id: retailer.id,
        price: Some(9.99),
        shipping_cost: None,
        in_stock: None,
        url: None,
    };
    let boundary = now - ChronoDuration::seconds(43200);
    catalog.upsert_price(&Price::from_observation(&observation, boundary), None).await?;

    let selector = EligibilitySelector::new(catalog.clone());
    assert!(selector.select_at(&retailer, Tier::PreviousYear, now).await?.is_empty());

    let later = now + ChronoDuration::seconds(1);
    assert_eq!(ids(&selector.select_at(&retailer, Tier::PreviousYear, later).await?), vec![product.id]);
    Ok(())
}

#[tokio::test]
async fn test_excluded_brand_is_never_selected() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    seed_product(&catalog, "2416", Some("Cobi"), Some(current_year())).await?;
    seed_product(&catalog, "2417", Some("Cobi"), None).await?;
    let lego = seed_product(&catalog, "60414", Some("LEGO"), Some(current_year())).await?;
    let unbranded = seed_product(&catalog, "0815", None, Some(current_year())).await?;

    let selector = EligibilitySelector::new(catalog.clone());
    let mut selected = Vec::new();
    for tier in Tier::ALL {
        selected.extend(selector.select(&retailer, tier).await?);
    }

    assert!(selected.iter().all(|u| u.manufacturer.as_deref() != Some("Cobi")));
    assert_eq!(ids(&selected), vec![lego.id, unbranded.id]);
    Ok(())
}

#[tokio::test]
async fn test_tiers_partition_release_years() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let year = current_year();
    let current = seed_product(&catalog, "1", Some("LEGO"), Some(year)).await?;
    let previous = seed_product(&catalog, "2", Some("LEGO"), Some(year - 1)).await?;
    let old = seed_product(&catalog, "3", Some("LEGO"), Some(year - 6)).await?;
    let undated = seed_product(&catalog, "4", Some("LEGO"), None).await?;
    let announced = seed_product(&catalog, "5", Some("LEGO"), Some(year + 1)).await?;

    let selector = EligibilitySelector::new(catalog.clone());

    assert_eq!(ids(&selector.select(&retailer, Tier::CurrentYear).await?), vec![current.id]);
    assert_eq!(ids(&selector.select(&retailer, Tier::PreviousYear).await?), vec![previous.id]);
    assert_eq!(
        ids(&selector.select(&retailer, Tier::Older).await?),
        vec![old.id, undated.id, announced.id]
    );
    Ok(())
}

#[tokio::test]
async fn test_prices_at_other_retailers_do_not_count() -> anyhow::Result<()> {
    let catalog = create_test_catalog().await?;
    let retailer = seed_retailer(&catalog).await?;
    let other = catalog
        .insert_retailer(&new_retailer("Brick Haus", ScrapingMethod::Ui, BrowserMode::Wire))
        .await?;
    let product = seed_product(&catalog, "10316", Some("LEGO"), Some(current_year())).await?;
    seed_price(&catalog, product.id, other.id, ChronoDuration::minutes(1)).await?;

    let selector = EligibilitySelector::new(catalog.clone());
    assert_eq!(ids(&selector.select(&retailer, Tier::CurrentYear).await?), vec![product.id]);
    assert!(selector.select(&other, Tier::CurrentYear).await?.is_empty());
    Ok(())
}
