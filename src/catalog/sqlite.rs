use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{CatalogStore, DueQuery, TierFilter};
use crate::config::DatabaseConfig;
use crate::models::{
    NewProduct, NewRetailer, Price, PricePoint, Product, Retailer, RetailerConfig, ScrapeTiers, ScrapeUnit,
};
use crate::Result;

#[derive(FromRow)]
struct PriceRow {
    id: i64,
    product_id: i64,
    retailer_id: i64,
    price: Option<f64>,
    shipping_cost: Option<f64>,
    in_stock: Option<bool>,
    url: Option<String>,
    last_updated: DateTime<Utc>,
    price_history: Json<Vec<PricePoint>>,
}

impl From<PriceRow> for Price {
    fn from(row: PriceRow) -> Self {
        Price {
            id: Some(row.id),
            product_id: row.product_id,
            retailer_id: row.retailer_id,
            price: row.price,
            shipping_cost: row.shipping_cost,
            in_stock: row.in_stock,
            url: row.url,
            last_updated: row.last_updated,
            price_history: row.price_history.0,
        }
    }
}

#[derive(FromRow)]
struct RetailerRow {
    id: i64,
    name: String,
    base_url: String,
    scraping_config: Json<RetailerConfig>,
    affiliate_tag: Option<String>,
    scrape_intervals: Json<ScrapeTiers>,
    excluded_brands: Json<Vec<String>>,
    base_image_url: Option<String>,
}

impl From<RetailerRow> for Retailer {
    fn from(row: RetailerRow) -> Self {
        Retailer {
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            scraping_config: row.scraping_config.0,
            affiliate_tag: row.affiliate_tag,
            scrape_intervals: row.scrape_intervals.0,
            excluded_brands: row.excluded_brands.0,
            base_image_url: row.base_image_url,
        }
    }
}

const RETAILER_COLUMNS: &str =
    "id, name, base_url, scraping_config, affiliate_tag, scrape_intervals, excluded_brands, base_image_url";

/// Catalog backed by SQLite.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database with the schema applied. Pinned to a single
    /// connection because every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let catalog = Self::new(pool);
        catalog.migrate().await?;
        Ok(catalog)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn query_due(&self, query: &DueQuery) -> Result<Vec<ScrapeUnit>> {
        let year_clause = match query.tier_filter {
            TierFilter::ReleasedIn(_) => "p.release_year = ?",
            TierFilter::NotReleasedIn(_) => "(p.release_year IS NULL OR p.release_year NOT IN (?, ?))",
        };

        let sql = format!(
            r"
            SELECT p.id, p.manufacturer_id, p.name, p.manufacturer, p.category, p.release_year
            FROM products p
            LEFT JOIN prices pr ON pr.product_id = p.id AND pr.retailer_id = ?
            WHERE {year_clause}
              AND (p.manufacturer IS NULL OR p.manufacturer NOT IN (SELECT value FROM json_each(?)))
              AND (pr.id IS NULL OR pr.last_updated < ?)
            ORDER BY p.id
            "
        );

        let mut statement = sqlx::query(&sql).bind(query.retailer_id);
        statement = match query.tier_filter {
            TierFilter::ReleasedIn(year) => statement.bind(year),
            TierFilter::NotReleasedIn([a, b]) => statement.bind(a).bind(b),
        };
        let rows = statement
            .bind(serde_json::to_string(&query.excluded_brands)?)
            .bind(query.stale_before)
            .fetch_all(&self.pool)
            .await?;

        let units = rows
            .into_iter()
            .map(|row| {
                Ok(ScrapeUnit {
                    product_id: row.try_get("id")?,
                    retailer_id: query.retailer_id,
                    manufacturer_id: row.try_get("manufacturer_id")?,
                    name: row.try_get("name")?,
                    manufacturer: row.try_get("manufacturer")?,
                    category: row.try_get("category")?,
                    release_year: row.try_get("release_year")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        debug!(retailer_id = query.retailer_id, due = units.len(), "queried due products");
        Ok(units)
    }

    async fn get_price(&self, product_id: i64, retailer_id: i64) -> Result<Option<Price>> {
        let row = sqlx::query_as::<_, PriceRow>(
            r"
            SELECT id, product_id, retailer_id, price, shipping_cost, in_stock, url, last_updated, price_history
            FROM prices
            WHERE product_id = ? AND retailer_id = ?
            ",
        )
        .bind(product_id)
        .bind(retailer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Price::from))
    }

    async fn upsert_price(&self, price: &Price, expected_last_updated: Option<DateTime<Utc>>) -> Result<bool> {
        let result = match expected_last_updated {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO prices
                    (product_id, retailer_id, price, shipping_cost, in_stock, url, last_updated, price_history)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (product_id, retailer_id) DO NOTHING
                    ",
                )
                .bind(price.product_id)
                .bind(price.retailer_id)
                .bind(price.price)
                .bind(price.shipping_cost)
                .bind(price.in_stock)
                .bind(&price.url)
                .bind(price.last_updated)
                .bind(Json(price.price_history.clone()))
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r"
                    UPDATE prices
                    SET price = ?, shipping_cost = ?, in_stock = ?, url = ?, last_updated = ?, price_history = ?
                    WHERE product_id = ? AND retailer_id = ? AND last_updated = ?
                    ",
                )
                .bind(price.price)
                .bind(price.shipping_cost)
                .bind(price.in_stock)
                .bind(&price.url)
                .bind(price.last_updated)
                .bind(Json(price.price_history.clone()))
                .bind(price.product_id)
                .bind(price.retailer_id)
                .bind(expected)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn identity_known(&self, product_id: i64, retailer_id: i64) -> Result<bool> {
        let known: i64 = sqlx::query_scalar(
            r"
            SELECT EXISTS(SELECT 1 FROM products WHERE id = ?)
               AND EXISTS(SELECT 1 FROM retailers WHERE id = ?)
            ",
        )
        .bind(product_id)
        .bind(retailer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(known != 0)
    }

    async fn get_retailer(&self, id: i64) -> Result<Option<Retailer>> {
        let sql = format!("SELECT {RETAILER_COLUMNS} FROM retailers WHERE id = ?");
        let row = sqlx::query_as::<_, RetailerRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Retailer::from))
    }

    async fn list_retailers(&self) -> Result<Vec<Retailer>> {
        let sql = format!("SELECT {RETAILER_COLUMNS} FROM retailers ORDER BY id");
        let rows = sqlx::query_as::<_, RetailerRow>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Retailer::from).collect())
    }

    async fn insert_retailer(&self, retailer: &NewRetailer) -> Result<Retailer> {
        retailer.validate()?;

        let result = sqlx::query(
            r"
            INSERT INTO retailers
            (name, base_url, scraping_config, affiliate_tag, scrape_intervals, excluded_brands, base_image_url)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&retailer.name)
        .bind(&retailer.base_url)
        .bind(Json(retailer.scraping_config.clone()))
        .bind(&retailer.affiliate_tag)
        .bind(Json(retailer.scrape_intervals))
        .bind(Json(retailer.excluded_brands.clone()))
        .bind(&retailer.base_image_url)
        .execute(&self.pool)
        .await?;

        Ok(Retailer {
            id: result.last_insert_rowid(),
            name: retailer.name.clone(),
            base_url: retailer.base_url.clone(),
            scraping_config: retailer.scraping_config.clone(),
            affiliate_tag: retailer.affiliate_tag.clone(),
            scrape_intervals: retailer.scrape_intervals,
            excluded_brands: retailer.excluded_brands.clone(),
            base_image_url: retailer.base_image_url.clone(),
        })
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<Product> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r"
            INSERT INTO products
            (manufacturer_id, name, manufacturer, category, base_image_url, description,
             piece_count, minifigures, release_year, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&product.manufacturer_id)
        .bind(&product.name)
        .bind(&product.manufacturer)
        .bind(&product.category)
        .bind(&product.base_image_url)
        .bind(&product.description)
        .bind(product.piece_count)
        .bind(product.minifigures)
        .bind(product.release_year)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Product {
            id: result.last_insert_rowid(),
            manufacturer_id: product.manufacturer_id.clone(),
            name: product.name.clone(),
            manufacturer: product.manufacturer.clone(),
            category: product.category.clone(),
            base_image_url: product.base_image_url.clone(),
            description: product.description.clone(),
            piece_count: product.piece_count,
            minifigures: product.minifigures,
            release_year: product.release_year,
            created_at,
        })
    }
}
