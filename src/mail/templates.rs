use crate::config::AppConfig;
use crate::mail::EmailMessage;
use crate::models::{Inquiry, Property};

/// Site identity shared by every template.
#[derive(Debug, Clone)]
pub struct Branding {
    pub site_name: String,
    pub site_url: Option<String>,
}

impl Branding {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            site_name: config.site_name.clone(),
            site_url: config.site_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
}

pub fn inquiry_notification(
    branding: &Branding,
    admin_email: &str,
    inquiry: &Inquiry,
    property: &Property,
) -> EmailMessage {
    let phone = inquiry.phone.as_deref().unwrap_or("-");
    let text = format!(
        "Neue Anfrage für \"{title}\" ({kind}, {price} EUR, {location})\n\n\
         Name: {name}\nE-Mail: {email}\nTelefon: {phone}\n\n{message}\n",
        title = property.title,
        kind = property.property_type,
        price = format_price(property.price),
        location = property.location,
        name = inquiry.name,
        email = inquiry.email,
        message = inquiry.message,
    );
    let html = wrap(
        branding,
        "Neue Immobilienanfrage",
        &format!(
            "<p>Sie haben eine neue Anfrage für folgende Immobilie erhalten:</p>\
             <h3>{title}</h3>\
             <p><strong>Typ:</strong> {kind}<br><strong>Preis:</strong> {price} EUR<br>\
             <strong>Standort:</strong> {location}</p>\
             <h3>Anfrage-Details</h3>\
             <p><strong>Name:</strong> {name}<br>\
             <strong>E-Mail:</strong> <a href=\"mailto:{email}\">{email}</a><br>\
             <strong>Telefon:</strong> {phone}</p>\
             <p>{message}</p>",
            title = escape(&property.title),
            kind = escape(&property.property_type),
            price = format_price(property.price),
            location = escape(&property.location),
            name = escape(&inquiry.name),
            email = escape(&inquiry.email),
            phone = escape(phone),
            message = escape(&inquiry.message).replace('\n', "<br>"),
        ),
    );

    EmailMessage {
        to: admin_email.to_string(),
        subject: format!("Neue Immobilienanfrage: {}", property.title),
        text,
        html,
    }
}

pub fn inquiry_confirmation(
    branding: &Branding,
    inquiry: &Inquiry,
    property: &Property,
) -> EmailMessage {
    let text = format!(
        "Hallo {name},\n\nvielen Dank für Ihre Anfrage zu \"{title}\". \
         Wir melden uns so schnell wie möglich bei Ihnen.\n\nIhr Team von {site}\n",
        name = inquiry.name,
        title = property.title,
        site = branding.site_name,
    );
    let html = wrap(
        branding,
        "Vielen Dank für Ihre Anfrage",
        &format!(
            "<p>Hallo {name},</p>\
             <p>vielen Dank für Ihre Anfrage zu <strong>{title}</strong> in {location}.</p>\
             <p>Wir melden uns so schnell wie möglich bei Ihnen.</p>\
             <p>Ihr Team von {site}</p>",
            name = escape(&inquiry.name),
            title = escape(&property.title),
            location = escape(&property.location),
            site = escape(&branding.site_name),
        ),
    );

    EmailMessage {
        to: inquiry.email.clone(),
        subject: format!("Ihre Anfrage zu: {}", property.title),
        text,
        html,
    }
}

pub fn welcome(branding: &Branding, to: &str, username: &str, full_name: Option<&str>) -> EmailMessage {
    let greeting = full_name.unwrap_or(username);
    let login_hint = branding
        .site_url
        .as_deref()
        .map(|url| format!("Sie können sich unter {url} anmelden."))
        .unwrap_or_default();
    let text = format!(
        "Hallo {greeting},\n\nIhr Konto bei {site} wurde eingerichtet. \
         Ihr Benutzername lautet: {username}\n{login_hint}\n",
        site = branding.site_name,
    );
    let html = wrap(
        branding,
        &format!("Willkommen bei {}", branding.site_name),
        &format!(
            "<p>Hallo {greeting},</p>\
             <p>Ihr Konto wurde eingerichtet. Ihr Benutzername lautet: \
             <strong>{username}</strong></p><p>{login_hint}</p>",
            greeting = escape(greeting),
            username = escape(username),
            login_hint = escape(&login_hint),
        ),
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("Willkommen bei {}", branding.site_name),
        text,
        html,
    }
}

pub fn general_contact(branding: &Branding, admin_email: &str, form: &ContactForm) -> EmailMessage {
    let phone = form.phone.as_deref().unwrap_or("-");
    let text = format!(
        "Neue Kontaktanfrage von {name} ({email}, Telefon: {phone})\n\
         Betreff: {subject}\n\n{message}\n",
        name = form.name,
        email = form.email,
        subject = form.subject,
        message = form.message,
    );
    let html = wrap(
        branding,
        "Neue Kontaktanfrage",
        &format!(
            "<p><strong>Von:</strong> {name} ({email})<br>\
             <strong>Telefon:</strong> {phone}<br>\
             <strong>Betreff:</strong> {subject}</p><p>{message}</p>",
            name = escape(&form.name),
            email = escape(&form.email),
            phone = escape(phone),
            subject = escape(&form.subject),
            message = escape(&form.message).replace('\n', "<br>"),
        ),
    );

    EmailMessage {
        to: admin_email.to_string(),
        subject: format!("Kontaktformular: {}", form.subject),
        text,
        html,
    }
}

fn wrap(branding: &Branding, heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family: Arial, sans-serif; color: #333;\">\
         <div style=\"max-width: 600px; margin: 0 auto;\">\
         <h2 style=\"background: #336699; color: #fff; padding: 16px;\">{heading}</h2>\
         {body}\
         <p style=\"color: #888; font-size: 12px;\">{site}</p>\
         </div></body></html>",
        heading = escape(heading),
        site = escape(&branding.site_name),
    )
}

fn format_price(price: f64) -> String {
    format!("{price:.2}")
}

pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
