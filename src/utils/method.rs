/// Dispatch verbs understood by the router.
///
/// ルータが扱うディスパッチ動詞のenum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GETメソッド
    GET,

    /// POSTメソッド
    POST,

    /// PUTメソッド
    PUT,

    /// PATCHメソッド
    PATCH,

    /// DELETEメソッド
    DELETE,
}

impl Method {
    /// 文字列からMethodを取得する
    #[inline]
    pub fn from_str(method: &str) -> Option<Method> {
        match method {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "PATCH" => Some(Method::PATCH),
            "DELETE" => Some(Method::DELETE),
            _ => None,
        }
    }

    #[inline]
    pub fn to_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}
