//! Printable invoice view.
//!
//! The document is self-contained (inline style, no external assets) and
//! calls `window.print()` once loaded, so opening it in the system browser is
//! the whole print flow.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::export::format_when;
use crate::pages::invoices::{amount_paid, PaymentStatus};
use crate::pages::{line_items, line_name, line_quantity, line_total, line_unit_price};
use crate::records::{f64_text, value_date, value_f64, value_str, FieldRef, FieldResolver, Record};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDoc {
    pub number: String,
    pub date: Option<String>,
    pub customer: Option<String>,
    pub customer_phone: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub discount: f64,
    pub total: f64,
    pub paid: f64,
    pub status: String,
    pub notes: Option<String>,
}

impl InvoiceDoc {
    /// Missing subtotal is the sum of line totals; missing total is
    /// `subtotal + tax - discount`.
    pub fn from_record(record: &Record, resolver: &FieldResolver, settings: &Settings) -> Self {
        let lines: Vec<InvoiceLine> = line_items(record)
            .iter()
            .map(|item| InvoiceLine {
                name: line_name(item),
                quantity: line_quantity(item),
                unit_price: line_unit_price(item),
                total: line_total(item),
            })
            .collect();

        let number = |paths: &[&str]| value_f64(record, &FieldRef::from(paths)).unwrap_or(0.0);
        let subtotal = value_f64(record, &FieldRef::from(["subtotal", "subTotal", "sub_total"]))
            .unwrap_or_else(|| lines.iter().map(|l| l.total).sum());
        let tax = number(&["tax", "taxAmount", "tax_amount", "vat"]);
        let discount = number(&["discount", "discountAmount", "discount_amount"]);
        let total = value_f64(record, &resolver.resolve("amount"))
            .unwrap_or(subtotal + tax - discount);

        Self {
            number: value_str(record, &resolver.resolve("invoiceNumber")).unwrap_or_default(),
            date: value_date(record, &resolver.resolve("date"))
                .map(|when| format_when(when, &settings.date_format)),
            customer: value_str(record, &resolver.resolve("customer")),
            customer_phone: value_str(record, &FieldRef::from(["customerPhone", "customer.phone"])),
            lines,
            subtotal,
            tax,
            discount,
            total,
            paid: amount_paid(record),
            status: PaymentStatus::of(record, resolver).label().to_string(),
            notes: value_str(record, &FieldRef::from(["notes", "note"])),
        }
    }

    pub fn balance(&self) -> f64 {
        (self.total - self.paid).max(0.0)
    }
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn money(symbol: &str, value: f64) -> String {
    format!("{}{value:.2}", esc(symbol))
}

fn totals_row(label: &str, value: String, strong: bool) -> String {
    if strong {
        format!("<tr class=\"grand\"><td>{}</td><td>{value}</td></tr>", esc(label))
    } else {
        format!("<tr><td>{}</td><td>{value}</td></tr>", esc(label))
    }
}

pub fn render_invoice_html(doc: &InvoiceDoc, settings: &Settings) -> String {
    let cur = settings.currency_symbol.as_str();
    let mut body = String::new();

    body.push_str("<header>");
    if !settings.store_name.trim().is_empty() {
        body.push_str(&format!("<h1>{}</h1>", esc(settings.store_name.trim())));
    }
    for extra in [&settings.store_address, &settings.store_phone].into_iter().flatten() {
        body.push_str(&format!("<div class=\"muted\">{}</div>", esc(extra)));
    }
    body.push_str("</header>");

    body.push_str(&format!(
        "<section class=\"meta\"><div><strong>Invoice</strong> {}</div>",
        esc(&doc.number)
    ));
    if let Some(date) = &doc.date {
        body.push_str(&format!("<div><strong>Date</strong> {}</div>", esc(date)));
    }
    if let Some(customer) = &doc.customer {
        body.push_str(&format!("<div><strong>Bill to</strong> {}", esc(customer)));
        if let Some(phone) = &doc.customer_phone {
            body.push_str(&format!(" <span class=\"muted\">{}</span>", esc(phone)));
        }
        body.push_str("</div>");
    }
    body.push_str(&format!(
        "<div><strong>Status</strong> {}</div></section>",
        esc(&doc.status)
    ));

    body.push_str(
        "<table class=\"items\"><thead><tr><th>Item</th><th>Qty</th><th>Price</th><th>Total</th></tr></thead><tbody>",
    );
    for line in &doc.lines {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            esc(&line.name),
            f64_text(line.quantity),
            money(cur, line.unit_price),
            money(cur, line.total)
        ));
    }
    body.push_str("</tbody></table>");

    body.push_str("<table class=\"totals\">");
    body.push_str(&totals_row("Subtotal", money(cur, doc.subtotal), false));
    if doc.tax != 0.0 {
        body.push_str(&totals_row("Tax", money(cur, doc.tax), false));
    }
    if doc.discount != 0.0 {
        body.push_str(&totals_row("Discount", format!("-{}", money(cur, doc.discount)), false));
    }
    body.push_str(&totals_row("Total", money(cur, doc.total), true));
    body.push_str(&totals_row("Paid", money(cur, doc.paid), false));
    body.push_str(&totals_row("Balance", money(cur, doc.balance()), false));
    body.push_str("</table>");

    if let Some(notes) = &doc.notes {
        body.push_str(&format!("<p class=\"muted\">{}</p>", esc(notes)));
    }
    if let Some(footer) = settings.invoice_footer.as_deref().filter(|f| !f.trim().is_empty()) {
        body.push_str(&format!("<footer>{}</footer>", esc(footer)));
    }

    html_shell(&format!("Invoice {}", doc.number), &body)
}

fn html_shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{}</title>
<style>
body {{ font-family: system-ui, -apple-system, "Segoe UI", sans-serif; margin: 0 auto; padding: 24px; max-width: 760px; color: #111; }}
header h1 {{ margin: 0 0 4px 0; font-size: 20px; }}
.muted {{ color: #666; font-size: 12px; }}
.meta {{ display: flex; flex-wrap: wrap; gap: 16px; margin: 16px 0; font-size: 13px; }}
table {{ width: 100%; border-collapse: collapse; font-size: 13px; }}
.items th {{ text-align: left; border-bottom: 2px solid #111; padding: 6px 4px; }}
.items td {{ border-bottom: 1px solid #ddd; padding: 6px 4px; }}
.items td:not(:first-child), .items th:not(:first-child) {{ text-align: right; }}
.totals {{ width: 280px; margin: 16px 0 0 auto; }}
.totals td {{ padding: 3px 4px; }}
.totals td:last-child {{ text-align: right; }}
.totals .grand td {{ font-weight: 700; border-top: 1px solid #111; }}
footer {{ margin-top: 24px; text-align: center; font-size: 12px; color: #444; }}
@media print {{ body {{ padding: 0; }} }}
</style>
</head>
<body>{}
<script>window.addEventListener("load", function () {{ window.print(); }});</script>
</body>
</html>"#,
        esc(title),
        body
    )
}

/// `invoice-<number>-<unix-ms>.html`, with the number reduced to a safe slug.
pub fn print_view_filename(number: &str, unix_ms: i64) -> String {
    let slug: String = number
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let slug = if slug.is_empty() { "draft".to_string() } else { slug };
    format!("invoice-{slug}-{unix_ms}.html")
}

pub fn write_print_view(html: &str, dir: &Path, number: &str, unix_ms: i64) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(print_view_filename(number, unix_ms));
    std::fs::write(&path, html)?;
    Ok(path)
}

/// Writes the document and hands it to the system browser.
pub fn open_print_view(html: &str, dir: &Path, number: &str, unix_ms: i64) -> Result<PathBuf> {
    let path = write_print_view(html, dir, number, unix_ms)?;
    let target = path
        .to_str()
        .ok_or_else(|| EngineError::Browser(format!("non UTF-8 path {}", path.display())))?;
    webbrowser::open(target).map_err(|e| EngineError::Browser(e.to_string()))?;
    info!(path = %path.display(), invoice = %number, "Opened invoice print view");
    Ok(path)
}
