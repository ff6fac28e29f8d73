use crate::error::AppError;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

/// 编译规则模式：不区分大小写、不锚定的子串匹配
pub fn compile_pattern(pattern: &str) -> Result<Regex, AppError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| AppError::Rule(format!("Invalid pattern {:?}: {}", pattern, e)))
}

/// 编译整串匹配模式，用于客户端地址这类需要完全相等的字段
pub fn compile_exact_pattern(pattern: &str) -> Result<Regex, AppError> {
    RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(true)
        .build()
        .map_err(|e| AppError::Rule(format!("Invalid pattern {:?}: {}", pattern, e)))
}

// 预编译的规则
#[derive(Debug)]
struct CompiledRule<T> {
    // 原始模式文本
    pattern: String,
    // 编译结果，编译失败的规则永远不匹配
    regex: Option<Regex>,
    // 命中时返回的值
    value: T,
}

/// 有序规则匹配器
///
/// 按配置顺序逐条求值，返回第一个匹配的规则的值；多个匹配之间不做合并。
#[derive(Debug)]
pub struct RuleMatcher<T> {
    rules: Vec<CompiledRule<T>>,
}

impl<T> RuleMatcher<T> {
    /// 严格构建：任一模式无法编译即返回错误
    pub fn new<I>(rules: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut compiled = Vec::new();
        for (pattern, value) in rules {
            let regex = compile_pattern(&pattern)?;
            compiled.push(CompiledRule {
                pattern,
                regex: Some(regex),
                value,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// 宽松构建：无法编译的模式保留其位置，但在求值时视为不匹配
    ///
    /// 返回匹配器和每条失败规则的错误，调用方负责记录这些错误。
    pub fn lenient<I>(rules: I) -> (Self, Vec<AppError>)
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();
        for (pattern, value) in rules {
            let regex = match compile_pattern(&pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Rule {:?} will never match: {}", pattern, e);
                    errors.push(e);
                    None
                }
            };
            compiled.push(CompiledRule {
                pattern,
                regex,
                value,
            });
        }
        (Self { rules: compiled }, errors)
    }

    /// 返回第一个匹配规则的下标和值
    pub fn first_match_with_index(&self, subject: &str) -> Option<(usize, &T)> {
        for (index, rule) in self.rules.iter().enumerate() {
            let Some(regex) = &rule.regex else {
                debug!("Skipping rule {:?}: pattern failed to compile", rule.pattern);
                continue;
            };
            if regex.is_match(subject) {
                debug!("Rule #{} {:?} matched {:?}", index, rule.pattern, subject);
                return Some((index, &rule.value));
            }
        }
        None
    }

    /// 返回第一个匹配规则的值
    #[inline]
    pub fn first_match(&self, subject: &str) -> Option<&T> {
        self.first_match_with_index(subject).map(|(_, value)| value)
    }

    /// 是否有任意规则匹配
    #[inline]
    pub fn is_match(&self, subject: &str) -> bool {
        self.first_match_with_index(subject).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 按顺序返回规则模式
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.pattern.as_str())
    }
}
