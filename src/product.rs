//! 商品查询领域服务
//!
//! 目前只有一个固定返回格式化字符串的桩实现，真实实现会在这里访问数据存储。

use crate::span::SpanFactory;
use opentelemetry::{Context, KeyValue};
use std::future::Future;
use std::num::ParseIntError;

/// 商品查询过程中的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    /// 路径中的商品ID不是合法整数
    #[error("parsing {input:?}: {source}")]
    InvalidId {
        input: String,
        #[source]
        source: ParseIntError,
    },

    /// 路径参数无法解码（例如不是合法的 UTF-8）
    #[error("decoding product id: {0}")]
    MalformedId(String),

    /// 商品不存在
    #[error("product with ID {0} not found")]
    NotFound(i64),
}

/// 把路径参数解析为商品ID
pub fn parse_product_id(raw: &str) -> Result<i64, ProductError> {
    raw.parse::<i64>().map_err(|source| ProductError::InvalidId {
        input: raw.to_string(),
        source,
    })
}

/// 商品服务接口
pub trait ProductService: Send + Sync + 'static {
    /// 按ID查询商品
    ///
    /// `cx` 是调用方的追踪上下文，实现应在其下创建自己的子 span
    fn get_by_id(
        &self,
        cx: Context,
        id: i64,
    ) -> impl Future<Output = Result<String, ProductError>> + Send;
}

/// 总是成功的桩实现
#[derive(Debug, Clone)]
pub struct StubProductService {
    spans: SpanFactory,
}

impl StubProductService {
    pub fn new(spans: SpanFactory) -> Self {
        Self { spans }
    }
}

impl ProductService for StubProductService {
    fn get_by_id(
        &self,
        cx: Context,
        id: i64,
    ) -> impl Future<Output = Result<String, ProductError>> + Send {
        async move {
            let scope = crate::start_span!(self.spans, &cx);
            scope.set_attribute(KeyValue::new("product.id", id));

            Ok(format!("product with ID {id}"))
        }
    }
}
