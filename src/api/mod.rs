pub mod gateway;

pub struct ApiUrls;

impl ApiUrls {
    pub fn get_payment_gateway_url() -> String {
        std::env::var("PAYMENT_GATEWAY_URL")
            .unwrap_or("http://localhost:4000/gateway".to_string())
    }
}
