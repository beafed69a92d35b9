pub(crate) mod ai_scoring;
pub(crate) mod baidu_ocr;
pub(crate) mod error;
pub(crate) mod scoring_parse;
pub(crate) mod storage;
