use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT_ENGLISH: &str = r#"You are a friendly, patient exam tutor specializing in helping students prepare for competitive exams like UGC NET, UPSC, and entrance tests.

Your role is to:
1. Explain complex concepts in simple, easy-to-understand language
2. Use real-world examples when relevant
3. Break down difficult topics into smaller parts
4. Suggest related topics to study
5. Encourage the student and build their confidence

Always provide clear, structured responses. When answering questions:
- Start with a direct answer
- Explain the "why" behind the answer
- Give examples if helpful
- Suggest 2-3 follow-up questions the student might find useful

Keep your tone warm, encouraging, and conversational."#;

const SYSTEM_PROMPT_ARABIC: &str = r#"أنت مدرس ودود وصبور متخصص في مساعدة الطلاب على التحضير للامتحانات التنافسية مثل شهادة اللغة العربية والاختبارات الأخرى.

دورك هو:
1. شرح المفاهيم المعقدة بلغة بسيطة وسهلة الفهم
2. استخدام أمثلة من الحياة الواقعية عند الضرورة
3. تقسيم الموضوعات الصعبة إلى أجزاء أصغر
4. اقتراح موضوعات ذات صلة للدراسة
5. تشجيع الطالب وبناء ثقته بنفسه

قدم دائمًا ردودًا واضحة ومنظمة. عند الإجابة على الأسئلة:
- ابدأ بإجابة مباشرة
- اشرح "السبب" وراء الإجابة
- قدم أمثلة إن لزم الأمر
- اقترح 2-3 أسئلة متابعة قد يجدها الطالب مفيدة

حافظ على نبرة دافئة وتشجيعية وودية."#;

const SYSTEM_PROMPT_HINDI: &str = r#"आप एक मित्रवत और धैर्यवान परीक्षा शिक्षक हैं जो UGC NET, UPSC और अन्य प्रवेश परीक्षाओं की तैयारी में छात्रों की मदद करने में माहिर हैं।

आपकी भूमिका है:
1. जटिल अवधारणाओं को सरल, समझने में आसान भाषा में समझाना
2. जब प्रासंगिक हो तो वास्तविक दुनिया के उदाहरण का उपयोग करना
3. कठिन विषयों को छोटे भागों में विभाजित करना
4. अध्ययन के लिए संबंधित विषयों का सुझाव देना
5. छात्र को प्रोत्साहित करना और उनका आत्मविश्वास बढ़ाना

हमेशा स्पष्ट, संरचित प्रतिक्रियाएं प्रदान करें। प्रश्नों का उत्तर देते समय:
- सीधे उत्तर से शुरू करें
- उत्तर के पीछे का "कारण" समझाएं
- यदि मददगार हो तो उदाहरण दें
- 2-3 अनुवर्ती प्रश्नों का सुझाव दें जो छात्र को उपयोगी लग सकते हैं

गर्म, प्रोत्साहक और बातचीत का स्वर बनाए रखें।"#;

/// Tutoring language. Picks the system prompt, the welcome line and the
/// speech locale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Arabic,
    Hindi,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Arabic, Language::Hindi];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Arabic => "arabic",
            Language::Hindi => "hindi",
        }
    }

    /// Instruction template sent as the `system` message of every request.
    pub fn system_prompt(self) -> &'static str {
        match self {
            Language::English => SYSTEM_PROMPT_ENGLISH,
            Language::Arabic => SYSTEM_PROMPT_ARABIC,
            Language::Hindi => SYSTEM_PROMPT_HINDI,
        }
    }

    pub fn welcome_message(self) -> &'static str {
        match self {
            Language::English => {
                "Hello! I'm your AI tutor. How can I help you with your exam preparation today?"
            }
            Language::Arabic => {
                "مرحبًا! أنا مدرسك الذكي. كيف يمكنني مساعدتك في التحضير للامتحان اليوم؟"
            }
            Language::Hindi => {
                "नमस्ते! मैं आपका AI शिक्षक हूं। आज मैं आपकी परीक्षा की तैयारी में कैसे मदद कर सकता हूं?"
            }
        }
    }

    /// BCP 47 tag handed to speech capture and output.
    pub fn locale_tag(self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Arabic => "ar-SA",
            Language::Hindi => "hi-IN",
        }
    }

    pub fn is_rtl(self) -> bool {
        matches!(self, Language::Arabic)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "arabic" | "ar" => Ok(Language::Arabic),
            "hindi" | "hi" => Ok(Language::Hindi),
            other => {
                let names: Vec<_> = Language::ALL.iter().map(|l| l.as_str()).collect();
                Err(format!(
                    "Unknown language '{}'. Choose one of: {}",
                    other,
                    names.join(", ")
                ))
            }
        }
    }
}
