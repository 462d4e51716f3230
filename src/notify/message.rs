//! Message bodies shared by the transports.
use crate::model::Listing;

const NA: &str = "N/A";

pub fn subject(listing: &Listing) -> String {
    format!("New apartment listing: {}", listing.title)
}

fn number(v: Option<f64>, unit: &str) -> String {
    match v {
        Some(v) => format!("{}{}", format_german(v), unit),
        None => NA.to_string(),
    }
}

/// `1234.5` → `1.234,5`. At most two decimals, trailing zeros dropped.
fn format_german(v: f64) -> String {
    let fixed = format!("{:.2}", v);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.trim_end_matches('0').to_string())),
        None => (fixed, None),
    };
    let frac_part = frac_part.filter(|f| !f.is_empty());
    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, ch) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 && ch.is_ascii_digit() {
            grouped.push('.');
        }
        grouped.push(*ch);
    }
    match frac_part {
        Some(f) => format!("{},{}", grouped, f),
        None => grouped,
    }
}

fn or_na(v: Option<&str>) -> &str {
    v.filter(|s| !s.trim().is_empty()).unwrap_or(NA)
}

pub fn text(listing: &Listing) -> String {
    format!(
        "New apartment found!\n\n{title}\n{address}\n\nZimmeranzahl: {rooms}\nWohnfläche: {area}\nKaltmiete: {rent}\nNebenkosten: {costs}\nWBS: {wbs}\n\n{url}",
        title = listing.title,
        address = or_na(listing.address.as_deref()),
        rooms = number(listing.rooms, ""),
        area = number(listing.area, " m²"),
        rent = number(listing.cold_rent, " €"),
        costs = or_na(listing.extra_costs.as_deref()),
        wbs = or_na(listing.wbs.as_deref()),
        url = or_na(listing.url.as_deref()),
    )
}

pub fn html(listing: &Listing) -> String {
    let rows = [
        ("Zimmeranzahl", number(listing.rooms, "")),
        ("Wohnfläche", number(listing.area, " m²")),
        ("Kaltmiete", number(listing.cold_rent, " €")),
        ("Nebenkosten", or_na(listing.extra_costs.as_deref()).to_string()),
        ("WBS", or_na(listing.wbs.as_deref()).to_string()),
    ];
    let rows: String = rows
        .iter()
        .map(|(label, value)| {
            format!(
                "<tr><td style=\"padding: 5px 15px 5px 0;\"><strong>{}:</strong></td><td style=\"padding: 5px;\">{}</td></tr>\n",
                label,
                escape_html(value)
            )
        })
        .collect();

    let image = listing
        .image_url
        .as_deref()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .map(|u| {
            format!(
                "<p><img src=\"{}\" alt=\"Apartment image\" style=\"max-width: 600px;\"></p>\n",
                escape_html(u)
            )
        })
        .unwrap_or_default();
    let link = listing
        .url
        .as_deref()
        .map(|u| format!("<p><a href=\"{}\">View details</a></p>\n", escape_html(u)))
        .unwrap_or_default();

    format!(
        "<html><body>\n<h2>New apartment found!</h2>\n<h3>{title}</h3>\n<p><strong>Adresse:</strong> {address}</p>\n<table style=\"border-collapse: collapse; margin: 20px 0;\">\n{rows}</table>\n{image}{link}</body></html>",
        title = escape_html(&listing.title),
        address = escape_html(or_na(listing.address.as_deref())),
    )
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Listing {
        let mut l = Listing::new("4711", "Musterstraße 1, 10115 Berlin");
        l.address = Some("Musterstraße 1, 10115 Berlin".into());
        l.url = Some("https://www.degewo.de/wohnung/4711".into());
        l.rooms = Some(1.5);
        l.area = Some(40.0);
        l.cold_rent = Some(1012.5);
        l.extra_costs = Some("120,00 €".into());
        l
    }

    #[test]
    fn text_lists_all_fields() {
        let body = text(&sample());
        assert!(body.contains("Zimmeranzahl: 1,5"));
        assert!(body.contains("Wohnfläche: 40 m²"));
        assert!(body.contains("Kaltmiete: 1.012,5 €"));
        assert!(body.contains("Nebenkosten: 120,00 €"));
        assert!(body.contains("WBS: N/A"));
        assert!(body.ends_with("https://www.degewo.de/wohnung/4711"));
    }

    #[test]
    fn html_escapes_and_skips_bad_images() {
        let mut l = sample();
        l.title = "<b>Loft</b> & more".into();
        l.image_url = Some("images/1.jpg".into());
        let body = html(&l);
        assert!(body.contains("&lt;b&gt;Loft&lt;/b&gt; &amp; more"));
        assert!(!body.contains("<img"));

        l.image_url = Some("https://img.example/1.jpg".into());
        assert!(html(&l).contains("<img src=\"https://img.example/1.jpg\""));
    }

    #[test]
    fn german_formatting() {
        assert_eq!(format_german(440.0), "440");
        assert_eq!(format_german(1234567.0), "1.234.567");
        assert_eq!(format_german(837.93), "837,93");
        assert_eq!(format_german(1.5), "1,5");
        assert_eq!(format_german(612.50), "612,5");
        assert_eq!(format_german(2.001), "2");
        assert_eq!(subject(&sample()), "New apartment listing: Musterstraße 1, 10115 Berlin");
    }
}
