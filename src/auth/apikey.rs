use crate::base::neterror::NetError;
use crate::request::HeaderList;
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApiKeyPlacement {
    #[default]
    Header,
    QueryParams,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeyAuth {
    pub key: String,
    pub value: String,
    pub placement: ApiKeyPlacement,
}

impl ApiKeyAuth {
    /// Add the key as a header or as a query parameter on `url`.
    pub fn apply(&self, url: &mut String, headers: &mut HeaderList) -> Result<(), NetError> {
        if self.key.is_empty() {
            return Ok(());
        }
        match self.placement {
            ApiKeyPlacement::Header => headers.set(self.key.clone(), self.value.clone()),
            ApiKeyPlacement::QueryParams => {
                let mut parsed = Url::parse(url).map_err(|_| NetError::invalid_url())?;
                parsed
                    .query_pairs_mut()
                    .append_pair(&self.key, &self.value);
                *url = parsed.to_string();
            }
        }
        Ok(())
    }
}
