//! CSV export and import for products and orders.
//!
//! Imports are parsed and validated completely before anything is written,
//! so a bad row rejects the whole file.

use thiserror::Error;

use crate::forms::{FormErrors, OrderForm, ProductForm, join_ids};
use crate::models::{OrderDetails, OrderFields, Product, ProductFields};

pub const PRODUCT_HEADER: [&str; 4] = ["name", "description", "price", "discount"];
pub const ORDER_HEADER: [&str; 5] = ["delivery_address", "promocode", "created_at", "user", "products"];

pub const PRODUCTS_FILENAME: &str = "products-export.csv";
pub const ORDERS_FILENAME: &str = "orders-export.csv";

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("could not parse CSV: {0}")]
    Parse(#[from] csv::Error),

    #[error("unexpected CSV header: expected {expected}, found {found}")]
    Header { expected: String, found: String },

    #[error("invalid CSV rows")]
    Rows(FormErrors),

    /// Writing into the in-memory buffer failed.
    #[error("could not write CSV: {0}")]
    Write(String),
}

impl CsvError {
    /// Field errors for invalid rows, if that is what failed.
    #[must_use]
    pub const fn row_errors(&self) -> Option<&FormErrors> {
        match self {
            Self::Rows(errors) => Some(errors),
            _ => None,
        }
    }
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, CsvError> {
    writer
        .into_inner()
        .map_err(|e| CsvError::Write(e.error().to_string()))
}

/// Products as `name,description,price,discount`.
///
/// # Errors
///
/// Returns `CsvError::Parse` if a record cannot be written.
pub fn write_products(products: &[Product]) -> Result<Vec<u8>, CsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PRODUCT_HEADER)?;
    for product in products {
        writer.write_record([
            product.name.as_str(),
            product.description.as_str(),
            product.price.to_string().as_str(),
            product.discount.to_string().as_str(),
        ])?;
    }
    finish(writer)
}

/// Orders as `delivery_address,promocode,created_at,user,products`.
///
/// `products` is a comma joined id list, quoted by the writer.
///
/// # Errors
///
/// Returns `CsvError::Parse` if a record cannot be written.
pub fn write_orders(orders: &[OrderDetails]) -> Result<Vec<u8>, CsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ORDER_HEADER)?;
    for details in orders {
        let order = &details.order;
        writer.write_record([
            order.delivery_address.as_str(),
            order.promocode.as_str(),
            order.created_at.to_rfc3339().as_str(),
            order.user_id.to_string().as_str(),
            join_ids(&details.product_ids()).as_str(),
        ])?;
    }
    finish(writer)
}

fn reader<'a>(data: &'a [u8], expected: &[&str]) -> Result<csv::Reader<&'a [u8]>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers = reader.headers()?;
    if !headers.iter().eq(expected.iter().copied()) {
        return Err(CsvError::Header {
            expected: expected.join(","),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }
    Ok(reader)
}

/// Parse and validate every product row.
///
/// # Errors
///
/// Returns `CsvError::Header` for a wrong header, `CsvError::Parse` for
/// malformed CSV or non UTF-8 input, and `CsvError::Rows` with the field
/// errors of every invalid row.
pub fn read_products(data: &[u8]) -> Result<Vec<ProductFields>, CsvError> {
    let mut reader = reader(data, &PRODUCT_HEADER)?;
    let mut products = Vec::new();
    let mut errors = FormErrors::new();

    for (index, record) in reader.deserialize::<ProductForm>().enumerate() {
        match record?.validate() {
            Ok(fields) => products.push(fields),
            Err(row_errors) => errors.merge(row_errors.for_row(index + 1)),
        }
    }

    errors.into_result(products).map_err(CsvError::Rows)
}

/// Parse and validate every order row. `created_at` is ignored.
///
/// # Errors
///
/// Same as [`read_products`].
pub fn read_orders(data: &[u8]) -> Result<Vec<OrderFields>, CsvError> {
    let mut reader = reader(data, &ORDER_HEADER)?;
    let mut orders = Vec::new();
    let mut errors = FormErrors::new();

    for (index, record) in reader.deserialize::<OrderForm>().enumerate() {
        match record?.validate() {
            Ok(fields) => orders.push(fields),
            Err(row_errors) => errors.merge(row_errors.for_row(index + 1)),
        }
    }

    errors.into_result(orders).map_err(CsvError::Rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use mysite_core::{Discount, OrderId, Price, ProductId, UserId};

    use super::*;
    use crate::models::{Order, OrderProduct};

    fn product(name: &str, description: &str, price: &str, discount: i16) -> Product {
        Product {
            id: ProductId::new(1),
            name: name.to_owned(),
            description: description.to_owned(),
            price: Price::parse(price).unwrap(),
            discount: Discount::try_from(discount).unwrap(),
            created_at: Utc::now(),
            archived: false,
            created_by: None,
            preview: None,
        }
    }

    #[test]
    fn test_products_export_then_import() {
        let exported = write_products(&[
            product("Chair", "A good chair, with arms", "123.45", 10),
            product("Desk", "Line one\nline two", "7", 0),
        ])
        .unwrap();
        let text = String::from_utf8(exported.clone()).unwrap();
        assert!(text.starts_with("name,description,price,discount\n"));
        assert!(text.contains("\"A good chair, with arms\""));

        let imported = read_products(&exported).unwrap();
        assert_eq!(imported.len(), 2);
        assert_eq!(imported[0].name, "Chair");
        assert_eq!(imported[0].description, "A good chair, with arms");
        assert_eq!(imported[0].price.to_string(), "123.45");
        assert_eq!(imported[0].discount.percent(), 10);
        assert_eq!(imported[1].description, "Line one\nline two");
        assert_eq!(imported[1].price.to_string(), "7.00");
    }

    #[test]
    fn test_import_rejects_bad_header() {
        let err = read_products(b"title,price\nChair,1\n").unwrap_err();
        assert!(matches!(err, CsvError::Header { .. }));
    }

    #[test]
    fn test_import_rejects_wrong_column_count() {
        let err = read_products(b"name,description,price,discount\nChair,desc,1\n").unwrap_err();
        assert!(matches!(err, CsvError::Parse(_)));
    }

    #[test]
    fn test_import_rejects_non_utf8() {
        let err = read_products(b"name,description,price,discount\n\xff\xfe,d,1,0\n").unwrap_err();
        assert!(matches!(err, CsvError::Parse(_)));
    }

    #[test]
    fn test_import_reports_every_bad_row() {
        let data = b"name,description,price,discount\nChair,d,abc,0\nDesk,d,1,0\n,d,1,500\n";
        let err = read_products(data).unwrap_err();
        let errors = err.row_errors().unwrap();
        assert_eq!(errors.get("row 1: price").len(), 1);
        assert_eq!(errors.get("row 3: name").len(), 1);
        assert_eq!(errors.get("row 3: discount").len(), 1);
    }

    #[test]
    fn test_orders_export_then_import() {
        let details = OrderDetails {
            order: Order {
                id: OrderId::new(5),
                delivery_address: "Main st. 1".to_owned(),
                promocode: "SALE".to_owned(),
                created_at: Utc::now(),
                user_id: UserId::new(2),
            },
            user: None,
            products: vec![
                OrderProduct {
                    id: ProductId::new(3),
                    name: "Chair".to_owned(),
                    price: Price::ZERO,
                },
                OrderProduct {
                    id: ProductId::new(4),
                    name: "Desk".to_owned(),
                    price: Price::ZERO,
                },
            ],
        };
        let exported = write_orders(&[details]).unwrap();
        let text = String::from_utf8(exported.clone()).unwrap();
        assert!(text.starts_with("delivery_address,promocode,created_at,user,products\n"));
        assert!(text.contains("\"3,4\""));

        let imported = read_orders(&exported).unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].user_id, UserId::new(2));
        assert_eq!(imported[0].products, vec![ProductId::new(3), ProductId::new(4)]);
    }
}
