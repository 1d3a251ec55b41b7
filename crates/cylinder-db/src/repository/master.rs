//! # Master Data Repository
//!
//! Customers, variants, warehouses, suppliers and bank accounts.
//!
//! The ledger only looks these up; their CRUD screens live in the
//! surrounding system. The insert methods here exist for seeding,
//! onboarding scripts and tests. Codes are validated on insert because they
//! end up inside reference numbers (`SO-{WAREHOUSE}-...`).

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use cylinder_core::validation::{validate_code, validate_id};
use cylinder_core::{BankAccount, Customer, Supplier, Variant, Warehouse};

/// Repository for master data lookups and inserts.
#[derive(Debug, Clone)]
pub struct MasterDataRepository {
    pool: SqlitePool,
}

impl MasterDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MasterDataRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Customers
    // -------------------------------------------------------------------------

    pub async fn insert_customer(&self, customer: &Customer) -> DbResult<()> {
        validate_id("customer id", &customer.id)?;
        debug!(id = %customer.id, "Inserting customer");

        sqlx::query("INSERT INTO customers (id, name, phone, is_active) VALUES (?1, ?2, ?3, ?4)")
            .bind(&customer.id)
            .bind(&customer.name)
            .bind(&customer.phone)
            .bind(customer.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_customer(&self, id: &str) -> DbResult<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        find_customer(&mut conn, id).await
    }

    /// Marks a customer inactive. Inactive customers receive no new entries.
    pub async fn deactivate_customer(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE customers SET is_active = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Variants
    // -------------------------------------------------------------------------

    pub async fn insert_variant(&self, variant: &Variant) -> DbResult<()> {
        validate_id("variant id", &variant.id)?;
        validate_code("variant code", &variant.code)?;
        debug!(id = %variant.id, code = %variant.code, "Inserting variant");

        sqlx::query("INSERT INTO variants (id, code, name, capacity) VALUES (?1, ?2, ?3, ?4)")
            .bind(&variant.id)
            .bind(&variant.code)
            .bind(&variant.name)
            .bind(&variant.capacity)
            .execute(&self.pool)
            .await
            .map_err(|e| on_duplicate_code(e, "variant code", &variant.code))?;
        Ok(())
    }

    pub async fn get_variant(&self, id: &str) -> DbResult<Option<Variant>> {
        let mut conn = self.pool.acquire().await?;
        find_variant(&mut conn, id).await
    }

    // -------------------------------------------------------------------------
    // Warehouses
    // -------------------------------------------------------------------------

    pub async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()> {
        validate_id("warehouse id", &warehouse.id)?;
        validate_code("warehouse code", &warehouse.code)?;
        debug!(id = %warehouse.id, code = %warehouse.code, "Inserting warehouse");

        sqlx::query("INSERT INTO warehouses (id, code, name) VALUES (?1, ?2, ?3)")
            .bind(&warehouse.id)
            .bind(&warehouse.code)
            .bind(&warehouse.name)
            .execute(&self.pool)
            .await
            .map_err(|e| on_duplicate_code(e, "warehouse code", &warehouse.code))?;
        Ok(())
    }

    pub async fn get_warehouse(&self, id: &str) -> DbResult<Option<Warehouse>> {
        let mut conn = self.pool.acquire().await?;
        find_warehouse(&mut conn, id).await
    }

    pub async fn get_warehouse_by_code(&self, code: &str) -> DbResult<Option<Warehouse>> {
        let row = sqlx::query("SELECT id, code, name FROM warehouses WHERE code = ?1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| warehouse_from_row(&r)).transpose()
    }

    pub async fn list_warehouses(&self) -> DbResult<Vec<Warehouse>> {
        let rows = sqlx::query("SELECT id, code, name FROM warehouses ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(warehouse_from_row).collect()
    }

    // -------------------------------------------------------------------------
    // Suppliers
    // -------------------------------------------------------------------------

    pub async fn insert_supplier(&self, supplier: &Supplier) -> DbResult<()> {
        validate_id("supplier id", &supplier.id)?;
        validate_code("supplier code", &supplier.code)?;
        debug!(id = %supplier.id, code = %supplier.code, "Inserting supplier");

        sqlx::query("INSERT INTO suppliers (id, code, name) VALUES (?1, ?2, ?3)")
            .bind(&supplier.id)
            .bind(&supplier.code)
            .bind(&supplier.name)
            .execute(&self.pool)
            .await
            .map_err(|e| on_duplicate_code(e, "supplier code", &supplier.code))?;
        Ok(())
    }

    pub async fn get_supplier(&self, id: &str) -> DbResult<Option<Supplier>> {
        let mut conn = self.pool.acquire().await?;
        find_supplier(&mut conn, id).await
    }

    // -------------------------------------------------------------------------
    // Bank accounts
    // -------------------------------------------------------------------------

    pub async fn insert_bank_account(&self, account: &BankAccount) -> DbResult<()> {
        validate_id("bank account id", &account.id)?;
        validate_code("bank account code", &account.code)?;
        debug!(id = %account.id, code = %account.code, "Inserting bank account");

        sqlx::query(
            "INSERT INTO bank_accounts (id, code, bank_name, account_number) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&account.id)
        .bind(&account.code)
        .bind(&account.bank_name)
        .bind(&account.account_number)
        .execute(&self.pool)
        .await
        .map_err(|e| on_duplicate_code(e, "bank account code", &account.code))?;
        Ok(())
    }

    pub async fn get_bank_account(&self, id: &str) -> DbResult<Option<BankAccount>> {
        let mut conn = self.pool.acquire().await?;
        find_bank_account(&mut conn, id).await
    }
}

fn on_duplicate_code(err: sqlx::Error, field: &str, code: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field: column, .. } if column.ends_with(".code") => {
            DbError::duplicate(field, code)
        }
        other => other,
    }
}

// =============================================================================
// Connection-scoped lookups
// =============================================================================

pub async fn find_customer(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Customer>> {
    let row = sqlx::query("SELECT id, name, phone, is_active FROM customers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| customer_from_row(&r)).transpose()
}

pub async fn find_variant(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Variant>> {
    let row = sqlx::query("SELECT id, code, name, capacity FROM variants WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| variant_from_row(&r)).transpose()
}

pub async fn find_warehouse(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Warehouse>> {
    let row = sqlx::query("SELECT id, code, name FROM warehouses WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| warehouse_from_row(&r)).transpose()
}

pub async fn find_supplier(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Supplier>> {
    let row = sqlx::query("SELECT id, code, name FROM suppliers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| supplier_from_row(&r)).transpose()
}

pub async fn find_bank_account(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<BankAccount>> {
    let row = sqlx::query("SELECT id, code, bank_name, account_number FROM bank_accounts WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| bank_account_from_row(&r)).transpose()
}

fn customer_from_row(r: &SqliteRow) -> DbResult<Customer> {
    Ok(Customer {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        phone: r.try_get("phone")?,
        is_active: r.try_get("is_active")?,
    })
}

fn variant_from_row(r: &SqliteRow) -> DbResult<Variant> {
    Ok(Variant {
        id: r.try_get("id")?,
        code: r.try_get("code")?,
        name: r.try_get("name")?,
        capacity: r.try_get("capacity")?,
    })
}

fn supplier_from_row(r: &SqliteRow) -> DbResult<Supplier> {
    Ok(Supplier {
        id: r.try_get("id")?,
        code: r.try_get("code")?,
        name: r.try_get("name")?,
    })
}

fn bank_account_from_row(r: &SqliteRow) -> DbResult<BankAccount> {
    Ok(BankAccount {
        id: r.try_get("id")?,
        code: r.try_get("code")?,
        bank_name: r.try_get("bank_name")?,
        account_number: r.try_get("account_number")?,
    })
}

fn warehouse_from_row(r: &SqliteRow) -> DbResult<Warehouse> {
    Ok(Warehouse {
        id: r.try_get("id")?,
        code: r.try_get("code")?,
        name: r.try_get("name")?,
    })
}

// `require_*` turn a missing row into NotFound.

pub async fn require_customer(conn: &mut SqliteConnection, id: &str) -> DbResult<Customer> {
    find_customer(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
}

pub async fn require_variant(conn: &mut SqliteConnection, id: &str) -> DbResult<Variant> {
    find_variant(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Variant", id))
}

pub async fn require_warehouse(conn: &mut SqliteConnection, id: &str) -> DbResult<Warehouse> {
    find_warehouse(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Warehouse", id))
}

pub async fn require_supplier(conn: &mut SqliteConnection, id: &str) -> DbResult<Supplier> {
    find_supplier(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Supplier", id))
}

pub async fn require_bank_account(conn: &mut SqliteConnection, id: &str) -> DbResult<BankAccount> {
    find_bank_account(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("BankAccount", id))
}

// =============================================================================
// Unit Tests
// =============================================================================
