//! # Seed Data Generator
//!
//! Populates a ledger database with demo master data, stock and entries.
//!
//! ## Usage
//! ```bash
//! # 25 customers (default)
//! cargo run -p cylinder-db --bin seed
//!
//! # Custom amount and path
//! cargo run -p cylinder-db --bin seed -- --customers 200 --db ./data/ledger.db
//! ```
//!
//! ## Generated Data
//! - Two warehouses (`WH1`, `WH2`), one supplier (`IOCL`), one bank account
//! - Domestic 14.2kg and commercial 19kg variants
//! - A supplier receipt into `WH1` and a transfer to `WH2`
//! - Per customer, over the last two weeks: a sale, a partial empty
//!   return and a bank payment against the remaining due

use chrono::{Days, NaiveDate, Utc};
use std::env;
use tracing_subscriber::EnvFilter;

use cylinder_core::{
    BankAccount, Customer, Money, NewLedgerEntry, PaymentMode, Quantity, ReceiptRequest, Supplier,
    TransactionKind, TransferRequest, Variant, Warehouse,
};
use cylinder_db::{Database, DbConfig, EngineConfig, LedgerEngine};

const DOMESTIC: &str = "var-dom14";
const COMMERCIAL: &str = "var-com19";

const FIRST_NAMES: &[&str] = &[
    "Asha", "Bharat", "Chandni", "Deepak", "Esha", "Farhan", "Gauri", "Harish", "Imran", "Jaya",
];
const TRADES: &[&str] = &["Traders", "Eatery", "Caterers", "Dhaba", "Sweets"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cylinder=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 25;
    let mut db_path = String::from("./cylinder_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--customers" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(25);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Cylinder Ledger Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --customers <N>  Number of customers to generate (default: 25)");
                println!("  -d, --db <PATH>      Database file path (default: ./cylinder_dev.db)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Cylinder Ledger Seed Data Generator");
    println!("===================================");
    println!("Database:  {}", db_path);
    println!("Customers: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    if db.masters().get_warehouse_by_code("WH1").await?.is_some() {
        println!("⚠ Database already has seed data");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    seed_masters(&db).await?;
    println!("✓ Master data created");

    let engine = db.engine(EngineConfig::default());
    let today = Utc::now().date_naive();
    let start = days_before(today, 14);

    // Enough filled cylinders for every customer's sale, split across godowns.
    let filled = (count as u32 * 6).max(10);
    let receipt = engine
        .receive_stock(ReceiptRequest {
            supplier_id: "sup-iocl".into(),
            warehouse_id: "wh-main".into(),
            variant_id: DOMESTIC.into(),
            filled_received: Quantity::new(filled),
            empty_returned: Quantity::zero(),
            receipt_date: start,
        })
        .await?;
    println!("✓ Received {} filled cylinders ({})", filled, receipt.reference);

    let moved = filled / 5;
    let transfer = engine
        .transfer_stock(TransferRequest {
            source_warehouse_id: "wh-main".into(),
            destination_warehouse_id: "wh-east".into(),
            variant_id: DOMESTIC.into(),
            filled: Quantity::new(moved),
            empty: Quantity::zero(),
            transfer_date: start,
        })
        .await?;
    println!("✓ Transferred {} to WH2 ({})", moved, transfer.reference);

    println!();
    println!("Generating customer activity...");
    let started = std::time::Instant::now();
    let mut entries = 0;

    for n in 0..count {
        let customer = Customer {
            id: format!("cust-{:04}", n + 1),
            name: format!(
                "{} {}",
                FIRST_NAMES[n % FIRST_NAMES.len()],
                TRADES[(n / FIRST_NAMES.len()) % TRADES.len()]
            ),
            phone: Some(format!("98{:08}", n * 7919 % 100_000_000)),
            is_active: true,
        };
        db.masters().insert_customer(&customer).await?;

        match seed_customer(&engine, &customer.id, n, start).await {
            Ok(written) => entries += written,
            Err(e) => eprintln!("Failed to seed {}: {}", customer.id, e),
        }

        if (n + 1) % 50 == 0 {
            println!("  Seeded {} customers...", n + 1);
        }
    }

    let elapsed = started.elapsed();
    println!();
    println!("✓ Wrote {} ledger entries in {:?}", entries, elapsed);

    let main = engine.stock_level("wh-main", DOMESTIC).await?;
    let east = engine.stock_level("wh-east", DOMESTIC).await?;
    println!("  WH1 filled {} / empty {}", main.filled, main.empty);
    println!("  WH2 filled {} / empty {}", east.filled, east.empty);

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}

async fn seed_masters(db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let masters = db.masters();

    masters
        .insert_variant(&Variant {
            id: DOMESTIC.into(),
            code: "DOM14".into(),
            name: "Domestic".into(),
            capacity: "14.2kg".into(),
        })
        .await?;
    masters
        .insert_variant(&Variant {
            id: COMMERCIAL.into(),
            code: "COM19".into(),
            name: "Commercial".into(),
            capacity: "19kg".into(),
        })
        .await?;

    for (id, code, name) in [("wh-main", "WH1", "Main Godown"), ("wh-east", "WH2", "East Godown")] {
        masters
            .insert_warehouse(&Warehouse {
                id: id.into(),
                code: code.into(),
                name: name.into(),
            })
            .await?;
    }

    masters
        .insert_supplier(&Supplier {
            id: "sup-iocl".into(),
            code: "IOCL".into(),
            name: "Indian Oil Corporation".into(),
        })
        .await?;

    masters
        .insert_bank_account(&BankAccount {
            id: "bank-hdfc".into(),
            code: "HDFC01".into(),
            bank_name: "HDFC Bank".into(),
            account_number: "50100012345678".into(),
        })
        .await?;

    Ok(())
}

/// Sale, partial return and a UPI payment for one customer.
async fn seed_customer(
    engine: &LedgerEngine,
    customer_id: &str,
    n: usize,
    start: NaiveDate,
) -> Result<usize, cylinder_db::DbError> {
    let issued = 2 + (n % 4) as u32;
    let price = Money::from_major_minor(900 + (n % 3) as i64 * 50, 0);
    let total = Money::from_cents(price.cents() * issued as i64);
    let sale_date = days_after(start, (n % 5) as u64 + 1);

    engine
        .append_ledger_entry(
            NewLedgerEntry::new(TransactionKind::Sale, customer_id, Some(DOMESTIC.into()), sale_date)
                .warehouse("wh-main")
                .issued(issued)
                .total(total)
                .received(price),
        )
        .await?;

    engine
        .append_ledger_entry(
            NewLedgerEntry::new(
                TransactionKind::EmptyReturn,
                customer_id,
                Some(DOMESTIC.into()),
                days_after(sale_date, 3),
            )
            .warehouse("wh-main")
            .returned(issued / 2),
        )
        .await?;

    let due = engine.outstanding_due(customer_id).await?;
    if !due.is_positive() {
        return Ok(2);
    }

    engine
        .append_ledger_entry(
            NewLedgerEntry::new(
                TransactionKind::Payment,
                customer_id,
                Some(DOMESTIC.into()),
                days_after(sale_date, 5),
            )
            .received(Money::from_cents(due.cents() / 2))
            .paid_via(PaymentMode::Upi, Some("bank-hdfc".into())),
        )
        .await?;

    Ok(3)
}

fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(date)
}

fn days_after(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(date)
}
