//! Decoding of the platform receipt payload.
//!
//! The blob is a DER `SET OF SEQUENCE { type, version, value }`. In-app
//! purchases are nested attribute sets inside type 17 values. Signature and
//! certificate checks happen before the payload reaches this module.

use super::der::{
    self, DerReader, TAG_IA5_STRING, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_SET,
    TAG_UTF8_STRING,
};
use super::product::ProductId;
use super::transaction::TransactionId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field names of the persisted receipt representation.
pub mod keys {
    pub const BUNDLE_IDENTIFIER: &str = "BundleIdentifier";
    pub const BUNDLE_IDENTIFIER_DATA: &str = "BundleIdentifierData";
    pub const VERSION: &str = "Version";
    pub const OPAQUE_VALUE: &str = "OpaqueValue";
    pub const HASH: &str = "Hash";
    pub const IN_APP: &str = "InApp";
    pub const ORIGINAL_VERSION: &str = "OriginalVersion";
    pub const EXPIRATION_DATE: &str = "ExpirationDate";

    pub const QUANTITY: &str = "Quantity";
    pub const PRODUCT_IDENTIFIER: &str = "ProductIdentifier";
    pub const TRANSACTION_IDENTIFIER: &str = "TransactionIdentifier";
    pub const PURCHASE_DATE: &str = "PurchaseDate";
    pub const ORIGINAL_TRANSACTION_IDENTIFIER: &str = "OriginalTransactionIdentifier";
    pub const ORIGINAL_PURCHASE_DATE: &str = "OriginalPurchaseDate";
    pub const SUBSCRIPTION_EXPIRATION_DATE: &str = "SubscriptionExpirationDate";
    pub const CANCELLATION_DATE: &str = "CancellationDate";
    pub const WEB_ORDER_LINE_ITEM_ID: &str = "WebOrderLineItemID";

    pub const RECEIPT: [&str; 8] = [
        BUNDLE_IDENTIFIER,
        BUNDLE_IDENTIFIER_DATA,
        VERSION,
        OPAQUE_VALUE,
        HASH,
        IN_APP,
        ORIGINAL_VERSION,
        EXPIRATION_DATE,
    ];

    pub const IN_APP_RECORD: [&str; 9] = [
        QUANTITY,
        PRODUCT_IDENTIFIER,
        TRANSACTION_IDENTIFIER,
        PURCHASE_DATE,
        ORIGINAL_TRANSACTION_IDENTIFIER,
        ORIGINAL_PURCHASE_DATE,
        SUBSCRIPTION_EXPIRATION_DATE,
        CANCELLATION_DATE,
        WEB_ORDER_LINE_ITEM_ID,
    ];
}

// Attribute type numbers of the receipt payload.
const ATTR_BUNDLE_IDENTIFIER: u64 = 2;
const ATTR_VERSION: u64 = 3;
const ATTR_OPAQUE_VALUE: u64 = 4;
const ATTR_HASH: u64 = 5;
const ATTR_IN_APP: u64 = 17;
const ATTR_ORIGINAL_VERSION: u64 = 19;
const ATTR_EXPIRATION_DATE: u64 = 21;

const ATTR_QUANTITY: u64 = 1701;
const ATTR_PRODUCT_IDENTIFIER: u64 = 1702;
const ATTR_TRANSACTION_IDENTIFIER: u64 = 1703;
const ATTR_PURCHASE_DATE: u64 = 1704;
const ATTR_ORIGINAL_TRANSACTION_IDENTIFIER: u64 = 1705;
const ATTR_ORIGINAL_PURCHASE_DATE: u64 = 1706;
const ATTR_SUBSCRIPTION_EXPIRATION_DATE: u64 = 1708;
const ATTR_WEB_ORDER_LINE_ITEM_ID: u64 = 1711;
const ATTR_CANCELLATION_DATE: u64 = 1712;

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("Malformed receipt: {0}")]
    Malformed(String),
    /// Well-formed receipt without purchases where at least one was expected.
    #[error("Receipt for {} contains no in-app purchases", .0.bundle_id)]
    Empty(Box<ReceiptRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InAppRecord {
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "ProductIdentifier")]
    pub product_id: ProductId,
    #[serde(rename = "TransactionIdentifier")]
    pub transaction_id: TransactionId,
    #[serde(rename = "PurchaseDate")]
    pub purchase_date: DateTime<Utc>,
    #[serde(rename = "OriginalTransactionIdentifier")]
    pub original_transaction_id: TransactionId,
    #[serde(rename = "OriginalPurchaseDate")]
    pub original_purchase_date: DateTime<Utc>,
    #[serde(rename = "SubscriptionExpirationDate")]
    pub subscription_expiration_date: Option<DateTime<Utc>>,
    #[serde(rename = "CancellationDate")]
    pub cancellation_date: Option<DateTime<Utc>>,
    #[serde(rename = "WebOrderLineItemID")]
    pub web_order_line_item_id: u64,
}

impl InAppRecord {
    /// A subscription is active at `at` if it has not expired and was never
    /// cancelled. Non-subscription purchases are never active.
    pub fn is_subscription_active(&self, at: DateTime<Utc>) -> bool {
        self.cancellation_date.is_none()
            && self
                .subscription_expiration_date
                .is_some_and(|expires| expires > at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    #[serde(rename = "BundleIdentifier")]
    pub bundle_id: String,
    /// Raw attribute value the bundle identifier was decoded from; feeds the
    /// hash check done by the verifier.
    #[serde(rename = "BundleIdentifierData", with = "hex_bytes")]
    pub bundle_id_data: Vec<u8>,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "OpaqueValue", with = "hex_bytes")]
    pub opaque_value: Vec<u8>,
    #[serde(rename = "Hash", with = "hex_bytes")]
    pub hash: Vec<u8>,
    #[serde(rename = "InApp")]
    pub in_app: Vec<InAppRecord>,
    #[serde(rename = "OriginalVersion")]
    pub original_version: Option<String>,
    #[serde(rename = "ExpirationDate")]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl ReceiptRecord {
    pub fn new(
        bundle_id: impl Into<String>,
        version: impl Into<String>,
        opaque_value: Vec<u8>,
        hash: Vec<u8>,
    ) -> Self {
        let bundle_id = bundle_id.into();
        Self {
            bundle_id_data: der::tlv(TAG_UTF8_STRING, bundle_id.as_bytes()),
            bundle_id,
            version: version.into(),
            opaque_value,
            hash,
            in_app: Vec::new(),
            original_version: None,
            expiration_date: None,
        }
    }

    pub fn purchases_of<'a>(
        &'a self,
        product_id: &'a ProductId,
    ) -> impl Iterator<Item = &'a InAppRecord> + 'a {
        self.in_app.iter().filter(move |r| &r.product_id == product_id)
    }

    /// True if any non-cancelled purchase of `product_id` is on the receipt.
    pub fn contains_purchase(&self, product_id: &ProductId) -> bool {
        self.purchases_of(product_id)
            .any(|r| r.cancellation_date.is_none())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn malformed(message: impl Into<String>) -> ReceiptError {
    ReceiptError::Malformed(message.into())
}

struct Attribute<'a> {
    kind: u64,
    value: &'a [u8],
}

fn read_attributes(set: &[u8]) -> Result<Vec<Attribute<'_>>, ReceiptError> {
    let mut reader = DerReader::new(set);
    let mut attributes = Vec::new();
    while !reader.is_empty() {
        let mut fields = DerReader::new(reader.expect(TAG_SEQUENCE)?);
        let kind = der::decode_unsigned(fields.expect(TAG_INTEGER)?)?;
        // Attribute version is informational only.
        fields.expect(TAG_INTEGER)?;
        let value = fields.expect(TAG_OCTET_STRING)?;
        attributes.push(Attribute { kind, value });
    }
    Ok(attributes)
}

fn read_set(blob: &[u8]) -> Result<&[u8], ReceiptError> {
    let mut reader = DerReader::new(blob);
    let set = reader.expect(TAG_SET)?;
    if !reader.is_empty() {
        return Err(malformed("trailing bytes after attribute set"));
    }
    Ok(set)
}

fn string_value(value: &[u8], field: &str) -> Result<String, ReceiptError> {
    let mut reader = DerReader::new(value);
    let tlv = reader.read()?;
    if tlv.tag != TAG_UTF8_STRING && tlv.tag != TAG_IA5_STRING {
        return Err(malformed(format!("{field} is not a string")));
    }
    String::from_utf8(tlv.contents.to_vec())
        .map_err(|_| malformed(format!("{field} is not valid UTF-8")))
}

/// Empty date strings mean "not set".
fn date_value(value: &[u8], field: &str) -> Result<Option<DateTime<Utc>>, ReceiptError> {
    let text = string_value(value, field)?;
    if text.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(&text)
        .map(|date| Some(date.with_timezone(&Utc)))
        .map_err(|e| malformed(format!("{field} '{text}' is not an RFC 3339 date: {e}")))
}

fn unsigned_value(value: &[u8]) -> Result<u64, ReceiptError> {
    let mut reader = DerReader::new(value);
    der::decode_unsigned(reader.expect(TAG_INTEGER)?)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ReceiptError> {
    value.ok_or_else(|| malformed(format!("missing {field}")))
}

fn parse_in_app(value: &[u8]) -> Result<InAppRecord, ReceiptError> {
    let mut quantity = 1;
    let mut product_id = None;
    let mut transaction_id = None;
    let mut original_transaction_id = None;
    let mut purchase_date = None;
    let mut original_purchase_date = None;
    let mut subscription_expiration_date = None;
    let mut cancellation_date = None;
    let mut web_order_line_item_id = 0;

    for attribute in read_attributes(read_set(value)?)? {
        let value = attribute.value;
        match attribute.kind {
            ATTR_QUANTITY => {
                quantity = u32::try_from(unsigned_value(value)?)
                    .map_err(|_| malformed(format!("{} out of range", keys::QUANTITY)))?;
            }
            ATTR_PRODUCT_IDENTIFIER => {
                product_id = Some(string_value(value, keys::PRODUCT_IDENTIFIER)?);
            }
            ATTR_TRANSACTION_IDENTIFIER => {
                transaction_id = Some(string_value(value, keys::TRANSACTION_IDENTIFIER)?);
            }
            ATTR_ORIGINAL_TRANSACTION_IDENTIFIER => {
                original_transaction_id =
                    Some(string_value(value, keys::ORIGINAL_TRANSACTION_IDENTIFIER)?);
            }
            ATTR_PURCHASE_DATE => purchase_date = date_value(value, keys::PURCHASE_DATE)?,
            ATTR_ORIGINAL_PURCHASE_DATE => {
                original_purchase_date = date_value(value, keys::ORIGINAL_PURCHASE_DATE)?;
            }
            ATTR_SUBSCRIPTION_EXPIRATION_DATE => {
                subscription_expiration_date =
                    date_value(value, keys::SUBSCRIPTION_EXPIRATION_DATE)?;
            }
            ATTR_CANCELLATION_DATE => {
                cancellation_date = date_value(value, keys::CANCELLATION_DATE)?;
            }
            ATTR_WEB_ORDER_LINE_ITEM_ID => web_order_line_item_id = unsigned_value(value)?,
            _ => {}
        }
    }

    let product_id = required(product_id, keys::PRODUCT_IDENTIFIER)?;
    let transaction_id = required(transaction_id, keys::TRANSACTION_IDENTIFIER)?;
    let purchase_date = required(purchase_date, keys::PURCHASE_DATE)?;

    Ok(InAppRecord {
        quantity,
        product_id: ProductId::new(product_id),
        original_transaction_id: TransactionId::new(
            original_transaction_id.unwrap_or_else(|| transaction_id.clone()),
        ),
        transaction_id: TransactionId::new(transaction_id),
        original_purchase_date: original_purchase_date.unwrap_or(purchase_date),
        purchase_date,
        subscription_expiration_date,
        cancellation_date,
        web_order_line_item_id,
    })
}

/// Decodes a receipt payload.
///
/// Fails with [`ReceiptError::Malformed`] if the bundle identifier, version
/// or hash are missing, or if any attribute is structurally invalid. A
/// receipt without in-app purchases is valid here; use
/// [`parse_expecting_purchases`] when at least one is required.
pub fn parse(blob: &[u8]) -> Result<ReceiptRecord, ReceiptError> {
    let mut bundle = None;
    let mut version = None;
    let mut opaque_value = Vec::new();
    let mut hash = None;
    let mut in_app = Vec::new();
    let mut original_version = None;
    let mut expiration_date = None;

    for attribute in read_attributes(read_set(blob)?)? {
        let value = attribute.value;
        match attribute.kind {
            ATTR_BUNDLE_IDENTIFIER => {
                bundle = Some((string_value(value, keys::BUNDLE_IDENTIFIER)?, value.to_vec()));
            }
            ATTR_VERSION => version = Some(string_value(value, keys::VERSION)?),
            ATTR_OPAQUE_VALUE => opaque_value = value.to_vec(),
            ATTR_HASH => hash = Some(value.to_vec()),
            ATTR_IN_APP => in_app.push(parse_in_app(value)?),
            ATTR_ORIGINAL_VERSION => {
                original_version = Some(string_value(value, keys::ORIGINAL_VERSION)?);
            }
            ATTR_EXPIRATION_DATE => {
                expiration_date = date_value(value, keys::EXPIRATION_DATE)?;
            }
            _ => {}
        }
    }

    let (bundle_id, bundle_id_data) = required(bundle, keys::BUNDLE_IDENTIFIER)?;
    let version = required(version, keys::VERSION)?;
    let hash = required(hash, keys::HASH)?;
    if hash.is_empty() {
        return Err(malformed(format!("empty {}", keys::HASH)));
    }

    Ok(ReceiptRecord {
        bundle_id,
        bundle_id_data,
        version,
        opaque_value,
        hash,
        in_app,
        original_version,
        expiration_date,
    })
}

/// Like [`parse`], but reports a receipt with no purchases as
/// [`ReceiptError::Empty`], carrying the decoded record.
pub fn parse_expecting_purchases(blob: &[u8]) -> Result<ReceiptRecord, ReceiptError> {
    let record = parse(blob)?;
    if record.in_app.is_empty() {
        return Err(ReceiptError::Empty(Box::new(record)));
    }
    Ok(record)
}

fn push_attribute(out: &mut Vec<u8>, kind: u64, value: &[u8]) {
    let mut fields = Vec::with_capacity(value.len() + 16);
    der::write_tlv(&mut fields, TAG_INTEGER, &der::encode_unsigned(kind));
    der::write_tlv(&mut fields, TAG_INTEGER, &der::encode_unsigned(1));
    der::write_tlv(&mut fields, TAG_OCTET_STRING, value);
    der::write_tlv(out, TAG_SEQUENCE, &fields);
}

fn utf8(text: &str) -> Vec<u8> {
    der::tlv(TAG_UTF8_STRING, text.as_bytes())
}

fn date(value: Option<&DateTime<Utc>>) -> Vec<u8> {
    let text = value
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    der::tlv(TAG_IA5_STRING, text.as_bytes())
}

fn integer(value: u64) -> Vec<u8> {
    der::tlv(TAG_INTEGER, &der::encode_unsigned(value))
}

fn encode_in_app(record: &InAppRecord) -> Vec<u8> {
    let mut attributes = Vec::new();
    push_attribute(&mut attributes, ATTR_QUANTITY, &integer(record.quantity.into()));
    push_attribute(
        &mut attributes,
        ATTR_PRODUCT_IDENTIFIER,
        &utf8(record.product_id.as_str()),
    );
    push_attribute(
        &mut attributes,
        ATTR_TRANSACTION_IDENTIFIER,
        &utf8(record.transaction_id.as_str()),
    );
    push_attribute(&mut attributes, ATTR_PURCHASE_DATE, &date(Some(&record.purchase_date)));
    push_attribute(
        &mut attributes,
        ATTR_ORIGINAL_TRANSACTION_IDENTIFIER,
        &utf8(record.original_transaction_id.as_str()),
    );
    push_attribute(
        &mut attributes,
        ATTR_ORIGINAL_PURCHASE_DATE,
        &date(Some(&record.original_purchase_date)),
    );
    push_attribute(
        &mut attributes,
        ATTR_SUBSCRIPTION_EXPIRATION_DATE,
        &date(record.subscription_expiration_date.as_ref()),
    );
    push_attribute(
        &mut attributes,
        ATTR_CANCELLATION_DATE,
        &date(record.cancellation_date.as_ref()),
    );
    push_attribute(
        &mut attributes,
        ATTR_WEB_ORDER_LINE_ITEM_ID,
        &integer(record.web_order_line_item_id),
    );
    der::tlv(TAG_SET, &attributes)
}

/// Encodes a record in the payload format [`parse`] reads.
///
/// Dates are written with second precision, which is all the format carries.
pub fn encode(record: &ReceiptRecord) -> Vec<u8> {
    let mut attributes = Vec::new();
    // The raw attribute is kept so the string tag survives a round trip.
    let bundle = if record.bundle_id_data.is_empty() {
        utf8(&record.bundle_id)
    } else {
        record.bundle_id_data.clone()
    };
    push_attribute(&mut attributes, ATTR_BUNDLE_IDENTIFIER, &bundle);
    push_attribute(&mut attributes, ATTR_VERSION, &utf8(&record.version));
    push_attribute(&mut attributes, ATTR_OPAQUE_VALUE, &record.opaque_value);
    push_attribute(&mut attributes, ATTR_HASH, &record.hash);
    if let Some(original_version) = &record.original_version {
        push_attribute(&mut attributes, ATTR_ORIGINAL_VERSION, &utf8(original_version));
    }
    if let Some(expiration) = &record.expiration_date {
        push_attribute(&mut attributes, ATTR_EXPIRATION_DATE, &date(Some(expiration)));
    }
    for in_app in &record.in_app {
        push_attribute(&mut attributes, ATTR_IN_APP, &encode_in_app(in_app));
    }
    der::tlv(TAG_SET, &attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn in_app(product: &str, tx: &str) -> InAppRecord {
        InAppRecord {
            quantity: 1,
            product_id: ProductId::from(product),
            transaction_id: TransactionId::from(tx),
            purchase_date: at(1_700_000_000),
            original_transaction_id: TransactionId::from(tx),
            original_purchase_date: at(1_700_000_000),
            subscription_expiration_date: None,
            cancellation_date: None,
            web_order_line_item_id: 0,
        }
    }

    fn sample() -> ReceiptRecord {
        let mut record = ReceiptRecord::new("com.example.app", "1.2", vec![7; 16], vec![9; 20]);
        record.original_version = Some("1.0".to_string());
        record.in_app.push(in_app("p1", "t1"));
        let mut subscription = in_app("sub.monthly", "t2");
        subscription.quantity = 3;
        subscription.original_transaction_id = TransactionId::from("t0");
        subscription.original_purchase_date = at(1_690_000_000);
        subscription.subscription_expiration_date = Some(at(1_702_600_000));
        subscription.web_order_line_item_id = 1_000_000_012_345;
        record.in_app.push(subscription);
        record
    }

    #[test]
    fn test_encode_then_parse_recovers_every_field() {
        let record = sample();
        let parsed = parse(&encode(&record)).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.in_app[1].web_order_line_item_id, 1_000_000_012_345);
    }

    #[test]
    fn test_ia5_bundle_identifier_survives_reencoding() {
        let mut attributes = Vec::new();
        push_attribute(
            &mut attributes,
            ATTR_BUNDLE_IDENTIFIER,
            &der::tlv(TAG_IA5_STRING, b"com.example.app"),
        );
        push_attribute(&mut attributes, ATTR_VERSION, &utf8("1.0"));
        push_attribute(&mut attributes, ATTR_HASH, &[5, 6]);
        push_attribute(&mut attributes, ATTR_IN_APP, &encode_in_app(&in_app("p1", "t1")));

        let first = parse(&der::tlv(TAG_SET, &attributes)).unwrap();
        assert_eq!(first.bundle_id, "com.example.app");
        assert_eq!(first.bundle_id_data[0], TAG_IA5_STRING);

        let second = parse(&encode(&first)).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn test_empty_bundle_data_falls_back_to_utf8() {
        let mut record = ReceiptRecord::new("com.example.app", "1.0", vec![1], vec![2]);
        record.bundle_id_data.clear();

        let parsed = parse(&encode(&record)).unwrap();
        assert_eq!(parsed.bundle_id, "com.example.app");
        assert_eq!(parsed.bundle_id_data, utf8("com.example.app"));
    }

    #[test]
    fn test_missing_required_fields_are_malformed() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, ATTR_BUNDLE_IDENTIFIER, &utf8("com.example.app"));
        push_attribute(&mut attributes, ATTR_HASH, &[1, 2, 3]);
        let blob = der::tlv(TAG_SET, &attributes);

        let err = parse(&blob).unwrap_err();
        assert!(matches!(&err, ReceiptError::Malformed(msg) if msg.contains(keys::VERSION)));
    }

    #[test]
    fn test_empty_hash_is_malformed() {
        let record = ReceiptRecord::new("com.example.app", "1.0", Vec::new(), Vec::new());
        assert!(matches!(parse(&encode(&record)), Err(ReceiptError::Malformed(_))));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(parse(b"not a receipt"), Err(ReceiptError::Malformed(_))));
        assert!(matches!(parse(&[]), Err(ReceiptError::Malformed(_))));
    }

    #[test]
    fn test_unknown_attributes_are_skipped() {
        let record = ReceiptRecord::new("com.example.app", "1.0", vec![1], vec![2]);
        let mut blob_attrs = Vec::new();
        push_attribute(&mut blob_attrs, 0, &utf8("sandbox"));
        push_attribute(&mut blob_attrs, ATTR_BUNDLE_IDENTIFIER, &utf8("com.example.app"));
        push_attribute(&mut blob_attrs, ATTR_VERSION, &utf8("1.0"));
        push_attribute(&mut blob_attrs, ATTR_OPAQUE_VALUE, &[1]);
        push_attribute(&mut blob_attrs, ATTR_HASH, &[2]);
        push_attribute(&mut blob_attrs, 12, &date(Some(&at(0))));

        assert_eq!(parse(&der::tlv(TAG_SET, &blob_attrs)).unwrap(), record);
    }

    #[test]
    fn test_empty_receipt_is_soft_failure() {
        let record = ReceiptRecord::new("com.example.app", "1.0", vec![1], vec![2]);
        let blob = encode(&record);

        assert!(parse(&blob).unwrap().in_app.is_empty());
        match parse_expecting_purchases(&blob) {
            Err(ReceiptError::Empty(parsed)) => assert_eq!(*parsed, record),
            other => panic!("expected empty receipt, got {other:?}"),
        }
    }

    #[test]
    fn test_in_app_without_product_is_malformed() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, ATTR_TRANSACTION_IDENTIFIER, &utf8("t1"));
        push_attribute(&mut attributes, ATTR_PURCHASE_DATE, &date(Some(&at(0))));
        let nested = der::tlv(TAG_SET, &attributes);

        let mut blob_attrs = Vec::new();
        push_attribute(&mut blob_attrs, ATTR_BUNDLE_IDENTIFIER, &utf8("com.example.app"));
        push_attribute(&mut blob_attrs, ATTR_VERSION, &utf8("1.0"));
        push_attribute(&mut blob_attrs, ATTR_HASH, &[2]);
        push_attribute(&mut blob_attrs, ATTR_IN_APP, &nested);

        let err = parse(&der::tlv(TAG_SET, &blob_attrs)).unwrap_err();
        assert!(err.to_string().contains(keys::PRODUCT_IDENTIFIER));
    }

    #[test]
    fn test_in_app_defaults_original_fields() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, ATTR_PRODUCT_IDENTIFIER, &utf8("p1"));
        push_attribute(&mut attributes, ATTR_TRANSACTION_IDENTIFIER, &utf8("t1"));
        push_attribute(&mut attributes, ATTR_PURCHASE_DATE, &date(Some(&at(42))));

        let record = parse_in_app(&der::tlv(TAG_SET, &attributes)).unwrap();
        assert_eq!(record.original_transaction_id, TransactionId::from("t1"));
        assert_eq!(record.original_purchase_date, at(42));
        assert_eq!(record.quantity, 1);
    }

    #[test]
    fn test_invalid_date_is_malformed() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, ATTR_PRODUCT_IDENTIFIER, &utf8("p1"));
        push_attribute(&mut attributes, ATTR_TRANSACTION_IDENTIFIER, &utf8("t1"));
        push_attribute(
            &mut attributes,
            ATTR_PURCHASE_DATE,
            &der::tlv(TAG_IA5_STRING, b"yesterday"),
        );

        let err = parse_in_app(&der::tlv(TAG_SET, &attributes)).unwrap_err();
        assert!(err.to_string().contains(keys::PURCHASE_DATE));
    }

    #[test]
    fn test_json_uses_fixed_key_vocabulary() {
        let json = serde_json::to_value(sample()).unwrap();
        let mut receipt_keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        receipt_keys.sort();
        let mut expected: Vec<_> = keys::RECEIPT.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(receipt_keys, expected);

        let first = &json[keys::IN_APP][0];
        let mut in_app_keys: Vec<_> = first.as_object().unwrap().keys().cloned().collect();
        in_app_keys.sort();
        let mut expected: Vec<_> = keys::IN_APP_RECORD.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(in_app_keys, expected);

        assert_eq!(json[keys::HASH], serde_json::json!(hex::encode([9u8; 20])));
        let restored: ReceiptRecord = serde_json::from_value(json).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_purchase_queries() {
        let mut record = sample();
        let p1 = ProductId::from("p1");
        let sub = ProductId::from("sub.monthly");
        assert!(record.contains_purchase(&p1));
        assert_eq!(record.purchases_of(&sub).count(), 1);
        assert!(!record.contains_purchase(&ProductId::from("p9")));

        let subscription = &record.in_app[1];
        assert!(subscription.is_subscription_active(at(1_700_000_000)));
        assert!(!subscription.is_subscription_active(at(1_800_000_000)));
        assert!(!record.in_app[0].is_subscription_active(at(0)));

        record.in_app[0].cancellation_date = Some(at(1_700_000_500));
        assert!(!record.contains_purchase(&p1));
    }
}
